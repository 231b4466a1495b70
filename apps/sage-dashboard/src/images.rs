use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, ImageReader};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::FetchError;

/// One image-capture event: when it was taken and where the image store keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub timestamp: DateTime<Utc>,
    pub source_uri: String,
}

/// Basic-auth credentials for the image store.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub format: Option<ImageFormat>,
    pub image: DynamicImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub type ImageOutcome = (ImageRecord, Result<DecodedImage, FetchError>);

pub trait ImageFetcher: Sync {
    fn fetch(&self, record: &ImageRecord) -> Result<DecodedImage, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: HttpClient,
    credentials: Option<Credentials>,
}

impl HttpImageFetcher {
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self, FetchError> {
        let http = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(FetchError::from_reqwest)?;
        Ok(Self { http, credentials })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, record: &ImageRecord) -> Result<DecodedImage, FetchError> {
        let mut request = self.http.get(&record.source_uri);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let mut response = request.send().map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::from_status(status));
        }

        // The scratch file is removed when `scratch` drops, whichever way we leave.
        let mut scratch = tempfile::NamedTempFile::new()?;
        response
            .copy_to(scratch.as_file_mut())
            .map_err(FetchError::from_reqwest)?;
        scratch.as_file_mut().flush()?;
        decode_file(scratch.path())
    }
}

pub fn decode_file(path: &Path) -> Result<DecodedImage, FetchError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader.format();
    let image = reader
        .decode()
        .map_err(|err| FetchError::Decode(err.to_string()))?;
    Ok(DecodedImage { format, image })
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Fetches every record on a bounded pool of scoped worker threads.
///
/// Output order matches input order regardless of completion order. A failure stays
/// attached to its own record and never stops the rest of the batch.
pub fn fetch_all<F>(records: Vec<ImageRecord>, fetcher: &F, workers: usize) -> Vec<ImageOutcome>
where
    F: ImageFetcher + ?Sized,
{
    if records.is_empty() {
        return Vec::new();
    }

    let workers = workers.clamp(1, records.len());
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, Result<DecodedImage, FetchError>)>();

    tracing::debug!(images = records.len(), workers, "fetching image batch");
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let records = &records;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(record) = records.get(index) else {
                    break;
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(record)))
                    .unwrap_or_else(|_| {
                        Err(FetchError::Decode("image fetch panicked".to_string()))
                    });
                if let Err(err) = &result {
                    tracing::warn!(uri = %record.source_uri, error = %err, "image fetch failed");
                }
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut results: Vec<_> = rx.into_iter().collect();
    results.sort_by_key(|(index, _)| *index);

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    tracing::info!(images = records.len(), failed, "image batch complete");

    records
        .into_iter()
        .zip(results.into_iter().map(|(_, result)| result))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png_bytes, MockServer};
    use axum::http::{header, HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::Router;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn record(minute: u32, uri: &str) -> ImageRecord {
        ImageRecord {
            timestamp: Utc
                .with_ymd_and_hms(2023, 3, 1, 4, minute, 0)
                .single()
                .expect("ts"),
            source_uri: uri.to_string(),
        }
    }

    struct ScriptedFetcher {
        failing: HashSet<String>,
        delay_first: bool,
        seen: Mutex<Vec<String>>,
    }

    impl ImageFetcher for ScriptedFetcher {
        fn fetch(&self, record: &ImageRecord) -> Result<DecodedImage, FetchError> {
            if self.delay_first && record.source_uri == "r1" {
                thread::sleep(Duration::from_millis(80));
            }
            self.seen.lock().expect("lock").push(record.source_uri.clone());
            if self.failing.contains(&record.source_uri) {
                return Err(FetchError::Decode("truncated body".to_string()));
            }
            Ok(DecodedImage {
                format: Some(ImageFormat::Png),
                image: DynamicImage::new_rgb8(2, 1),
            })
        }
    }

    fn scripted(failing: &[&str], delay_first: bool) -> ScriptedFetcher {
        ScriptedFetcher {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            delay_first,
            seen: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let fetcher = scripted(&[], false);
        let out = fetch_all(Vec::new(), &fetcher, 4);
        assert!(out.is_empty());
        assert!(fetcher.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn preserves_input_positions_with_mixed_outcomes() {
        let fetcher = scripted(&["r2"], true);
        let records = vec![record(0, "r1"), record(5, "r2"), record(10, "r3")];

        let out = fetch_all(records.clone(), &fetcher, 3);

        assert_eq!(out.len(), 3);
        for ((got, _), want) in out.iter().zip(records.iter()) {
            assert_eq!(got, want);
        }
        assert!(out[0].1.is_ok());
        assert!(matches!(out[1].1, Err(FetchError::Decode(_))));
        assert!(out[2].1.is_ok());
    }

    struct PanicsOn(&'static str);

    impl ImageFetcher for PanicsOn {
        fn fetch(&self, record: &ImageRecord) -> Result<DecodedImage, FetchError> {
            if record.source_uri == self.0 {
                panic!("decoder blew up on {}", record.source_uri);
            }
            Ok(DecodedImage {
                format: None,
                image: DynamicImage::new_rgb8(1, 1),
            })
        }
    }

    #[test]
    fn panicking_fetch_is_isolated_to_its_record() {
        let records = vec![record(0, "r1"), record(5, "r2"), record(10, "r3")];

        let out = fetch_all(records, &PanicsOn("r2"), 3);

        assert_eq!(out.len(), 3);
        assert!(out[0].1.is_ok());
        assert!(matches!(&out[1].1, Err(FetchError::Decode(msg)) if msg.contains("panicked")));
        assert!(out[2].1.is_ok());
    }

    #[test]
    fn every_record_is_fetched_exactly_once() {
        let fetcher = scripted(&[], false);
        let records: Vec<_> = (0..25).map(|i| record(i, &format!("img-{i}"))).collect();

        let out = fetch_all(records, &fetcher, 4);

        assert_eq!(out.len(), 25);
        let mut seen = fetcher.seen.lock().expect("lock").clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn credentials_debug_hides_the_password() {
        let creds = Credentials {
            username: "operator".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("operator"));
        assert!(!rendered.contains("hunter2"));
    }

    fn authorized(headers: &HeaderMap) -> bool {
        // "operator:token" in base64.
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "Basic b3BlcmF0b3I6dG9rZW4=")
            .unwrap_or(false)
    }

    #[test]
    fn http_fetcher_decodes_and_isolates_failures() {
        let png = png_bytes(4, 3);
        let router = Router::new()
            .route(
                "/ok.png",
                get(move |headers: HeaderMap| {
                    let png = png.clone();
                    async move {
                        if !authorized(&headers) {
                            return (AxumStatus::UNAUTHORIZED, Vec::new());
                        }
                        (AxumStatus::OK, png)
                    }
                }),
            )
            .route(
                "/garbage.jpg",
                get(|| async { (AxumStatus::OK, b"definitely not an image".to_vec()) }),
            )
            .route("/missing.jpg", get(|| async { AxumStatus::NOT_FOUND }));
        let server = MockServer::start(router);

        let fetcher = HttpImageFetcher::new(
            Duration::from_secs(5),
            "sage-dashboard-tests",
            Some(Credentials {
                username: "operator".to_string(),
                password: "token".to_string(),
            }),
        )
        .expect("fetcher");
        let records = vec![
            record(0, &server.url("/ok.png")),
            record(1, &server.url("/garbage.jpg")),
            record(2, &server.url("/missing.jpg")),
        ];

        let out = fetch_all(records, &fetcher, 2);

        let decoded = out[0].1.as_ref().expect("decoded");
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.format, Some(ImageFormat::Png));
        assert!(matches!(out[1].1, Err(FetchError::Decode(_))));
        assert!(matches!(
            out[2].1,
            Err(FetchError::Status { status }) if status == StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn bad_credentials_are_an_auth_error() {
        let png = png_bytes(1, 1);
        let router = Router::new().route(
            "/ok.png",
            get(move |headers: HeaderMap| {
                let png = png.clone();
                async move {
                    if !authorized(&headers) {
                        return (AxumStatus::UNAUTHORIZED, Vec::new());
                    }
                    (AxumStatus::OK, png)
                }
            }),
        );
        let server = MockServer::start(router);

        let fetcher = HttpImageFetcher::new(
            Duration::from_secs(5),
            "sage-dashboard-tests",
            Some(Credentials {
                username: "operator".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .expect("fetcher");

        let err = fetcher
            .fetch(&record(0, &server.url("/ok.png")))
            .unwrap_err();
        assert!(matches!(err, FetchError::Auth { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn slow_image_times_out() {
        let router = Router::new().route(
            "/slow.jpg",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                AxumStatus::OK
            }),
        );
        let server = MockServer::start(router);

        let fetcher =
            HttpImageFetcher::new(Duration::from_millis(200), "sage-dashboard-tests", None)
                .expect("fetcher");
        let err = fetcher
            .fetch(&record(0, &server.url("/slow.jpg")))
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout), "got {err:?}");
    }
}
