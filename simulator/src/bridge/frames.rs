use anyhow::Context;
use log::{debug, info};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use warp::http::{header, HeaderValue, Response, StatusCode};
use warp::hyper::body::Bytes;
use warp::hyper::Body;

/// MJPEG part boundary, matching the vision backend.
pub const BOUNDARY: &str = "frame";

/// JPEG frames cycled on the `/video_feed` route.
#[derive(Clone, Default)]
pub struct FrameLibrary {
    frames: Arc<Vec<Vec<u8>>>,
}

impl FrameLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: Arc::new(frames),
        }
    }

    /// Loads every `.jpg`/`.jpeg` file in `dir`, sorted by file name.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut paths = fs::read_dir(dir)
            .with_context(|| format!("reading frames directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| {
                        ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg")
                    })
            })
            .collect::<Vec<_>>();
        paths.sort();

        let frames = paths
            .iter()
            .map(|path| fs::read(path).with_context(|| format!("reading frame {}", path.display())))
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!("loaded {} frames from {}", frames.len(), dir.display());
        Ok(Self::from_frames(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// One multipart part wrapping frame `index` (modulo the library size).
    pub fn part(&self, index: usize) -> Option<Vec<u8>> {
        if self.frames.is_empty() {
            return None;
        }
        let frame = &self.frames[index % self.frames.len()];
        let mut part = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        )
        .into_bytes();
        part.extend_from_slice(frame);
        part.extend_from_slice(b"\r\n");
        Some(part)
    }

    /// Streaming response that cycles the frames until the client goes away.
    pub fn stream_response(&self, interval: Duration) -> Response<Body> {
        if self.is_empty() {
            let mut response = Response::new(Body::from("no frames configured"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        }

        let (mut sender, body) = Body::channel();
        let library = self.clone();
        tokio::spawn(async move {
            let mut index = 0;
            while let Some(part) = library.part(index) {
                if sender.send_data(Bytes::from(part)).await.is_err() {
                    debug!("video feed client went away after {index} frames");
                    break;
                }
                index += 1;
                tokio::time::sleep(interval).await;
            }
        });

        let mut response = Response::new(body);
        let content_type = format!("multipart/x-mixed-replace; boundary={BOUNDARY}");
        if let Ok(value) = content_type.parse::<HeaderValue>() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsecore::stream::MjpegDecoder;
    use std::io::Write;

    #[test]
    fn parts_decode_back_into_frames() {
        let library =
            FrameLibrary::from_frames(vec![b"\xff\xd8a\xff\xd9".to_vec(), b"bb".to_vec()]);
        let mut decoder = MjpegDecoder::new(BOUNDARY, 1024);
        for index in 0..3 {
            decoder.push(&library.part(index).unwrap());
        }
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame.data);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], frames[0]);
        assert_eq!(frames[1], b"bb");
    }

    #[test]
    fn load_picks_jpegs_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, bytes) in [("b.jpg", b"B"), ("a.JPEG", b"A"), ("notes.txt", b"x")] {
            fs::File::create(dir.path().join(name))
                .unwrap()
                .write_all(bytes)
                .unwrap();
        }
        let library = FrameLibrary::load(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert!(library.part(0).unwrap().ends_with(b"\r\n\r\nA\r\n"));
    }

    #[test]
    fn empty_library_has_no_parts() {
        assert!(FrameLibrary::empty().part(0).is_none());
        let response = FrameLibrary::empty().stream_response(Duration::from_millis(10));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
