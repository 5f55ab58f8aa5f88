use crate::config::StreamConfig;
use crate::stream::mjpeg::{boundary_from_content_type, Frame, MjpegDecoder};
use crate::telemetry::MetricsRecorder;
use log::{debug, info, warn};
use reqwest::{header, Client, Response};
use std::sync::Arc;

/// Shows the most recent frame of an MJPEG stream.
///
/// Any failure (request error, bad status, missing boundary, decode error,
/// end of stream) marks the viewer unavailable for good. Nothing is retried.
pub struct ImageStreamViewer {
    url: String,
    response: Option<Response>,
    decoder: Option<MjpegDecoder>,
    latest: Option<Frame>,
    unavailable: bool,
    frames: u64,
    metrics: Arc<MetricsRecorder>,
}

impl ImageStreamViewer {
    /// Issues the standing stream request. Never fails; check
    /// [`is_unavailable`](Self::is_unavailable) instead.
    pub async fn attach(url: impl Into<String>, config: &StreamConfig) -> Self {
        Self::attach_with_metrics(url, config, Arc::new(MetricsRecorder::new())).await
    }

    pub async fn attach_with_metrics(
        url: impl Into<String>,
        config: &StreamConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let mut viewer = Self {
            url: url.into(),
            response: None,
            decoder: None,
            latest: None,
            unavailable: false,
            frames: 0,
            metrics,
        };
        match viewer.open(config).await {
            Ok((response, decoder)) => {
                info!("image stream attached at {}", viewer.url);
                viewer.response = Some(response);
                viewer.decoder = Some(decoder);
            }
            Err(reason) => viewer.fail(&reason),
        }
        viewer
    }

    pub fn stream_url(&self) -> &str {
        &self.url
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest.as_ref()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames
    }

    /// Waits for the next frame and makes it the current one.
    ///
    /// Returns `None` once the stream is unavailable; the last good frame is
    /// dropped at that point so callers hide the element.
    pub async fn next_frame(&mut self) -> Option<&Frame> {
        loop {
            let (Some(response), Some(decoder)) = (self.response.as_mut(), self.decoder.as_mut())
            else {
                return None;
            };

            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    self.frames += 1;
                    self.metrics.record_frame();
                    debug!("frame {} ({} bytes)", frame.sequence, frame.data.len());
                    self.latest = Some(frame);
                    return self.latest.as_ref();
                }
                Ok(None) if decoder.is_finished() => {
                    self.fail("stream ended");
                    return None;
                }
                Ok(None) => {}
                Err(err) => {
                    self.fail(&err.to_string());
                    return None;
                }
            }

            match response.chunk().await {
                Ok(Some(chunk)) => decoder.push(&chunk),
                Ok(None) => {
                    self.fail("stream ended");
                    return None;
                }
                Err(err) => {
                    self.fail(&err.to_string());
                    return None;
                }
            }
        }
    }

    async fn open(&self, config: &StreamConfig) -> Result<(Response, MjpegDecoder), String> {
        let client = Client::new();
        let mut request = client.get(&self.url);
        if let Some(timeout) = config.connect_timeout() {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let boundary = boundary_from_content_type(content_type)
            .ok_or_else(|| format!("not a multipart stream: {content_type:?}"))?;
        Ok((response, MjpegDecoder::new(&boundary, config.max_frame_bytes)))
    }

    fn fail(&mut self, reason: &str) {
        if !self.unavailable {
            warn!("image stream {} unavailable: {reason}", self.url);
            self.metrics.record_transport_failure();
        }
        self.unavailable = true;
        self.response = None;
        self.decoder = None;
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_stream_fails_closed() {
        let mut viewer =
            ImageStreamViewer::attach("http://127.0.0.1:9/video_feed", &StreamConfig::default())
                .await;
        assert!(viewer.is_unavailable());
        assert_eq!(viewer.stream_url(), "http://127.0.0.1:9/video_feed");
        assert!(viewer.next_frame().await.is_none());
        assert!(viewer.latest_frame().is_none());
    }

    #[tokio::test]
    async fn malformed_url_fails_closed() {
        let viewer = ImageStreamViewer::attach("::nope::", &StreamConfig::default()).await;
        assert!(viewer.is_unavailable());
    }
}
