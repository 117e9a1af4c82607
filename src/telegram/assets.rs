//! Static Mini App assets with brotli negotiation
//!
//! The front end build places `<file>.br` next to every compressible `<file>`.
//! For GET/HEAD requests from clients that accept `br`, the compressed sibling
//! is served with `Content-Encoding: br` and the content type of the original.
//! Everything else goes to `ServeDir` (path sanitising, index files, 404/405).

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

const BROTLI: &str = "br";
const INDEX_FILE: &str = "index.html";

/// Serves files below `root`.
#[derive(Clone, Debug)]
pub struct AssetServer {
    root: Arc<PathBuf>,
    serve_dir: ServeDir,
}

/// A `.br` sibling chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Precompressed {
    path: PathBuf,
    content_type: HeaderValue,
}

impl AssetServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let serve_dir = ServeDir::new(&root).append_index_html_on_directories(true);

        Self {
            root: Arc::new(root),
            serve_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn serve(&self, req: Request) -> Response {
        // Read everything needed up front: `Body` is not `Sync`, so no borrow
        // of the request may live across an await.
        let negotiate = matches!(*req.method(), Method::GET | Method::HEAD) && accepts_brotli(req.headers());
        if negotiate {
            let path = req.uri().path().to_owned();
            if let Some(precompressed) = self.precompressed_for(&path).await {
                return serve_precompressed(precompressed, req).await;
            }
        }

        match self.serve_dir.clone().oneshot(req).await {
            Ok(res) => res.into_response(),
            Err(never) => match never {},
        }
    }

    /// Finds the `.br` sibling for a request path, if both files exist.
    async fn precompressed_for(&self, uri_path: &str) -> Option<Precompressed> {
        let relative = sanitize_path(uri_path)?;
        let original = self.root.join(&relative);
        let mut compressed = original.clone().into_os_string();
        compressed.push(".");
        compressed.push(BROTLI);
        let compressed = PathBuf::from(compressed);

        // The original must exist too; a lone `.br` is not an asset.
        if !is_file(&original).await || !is_file(&compressed).await {
            return None;
        }

        let mime = mime_guess::from_path(&relative).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.as_ref()).ok()?;

        Some(Precompressed {
            path: compressed,
            content_type,
        })
    }
}

async fn serve_precompressed(precompressed: Precompressed, req: Request) -> Response {
    let res: Result<_, Infallible> = ServeFile::new(&precompressed.path).oneshot(req).await;
    let mut res = match res {
        Ok(res) => res.map(Body::new),
        Err(never) => match never {},
    };

    if !res.status().is_client_error() && !res.status().is_server_error() {
        let headers = res.headers_mut();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(BROTLI));
        headers.insert(CONTENT_TYPE, precompressed.content_type);
        headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
    }

    res
}

/// Whether `Accept-Encoding` lists `br` with a non-zero quality.
pub fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| {
            let mut parts = item.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            if !coding.eq_ignore_ascii_case(BROTLI) {
                return false;
            }
            !parts.any(|param| {
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            })
        })
}

/// Maps a request path to a relative file path inside the asset root.
///
/// Returns `None` for anything that could leave the root; such requests are
/// left to `ServeDir`. `..` is refused as `ServeDir` refuses it; a backslash
/// is refused too, since it separates segments on Windows.
fn sanitize_path(uri_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(uri_path).ok()?;
    let mut relative = PathBuf::new();

    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => relative.push(s),
        }
    }

    if decoded.ends_with('/') || relative.as_os_str().is_empty() {
        relative.push(INDEX_FILE);
    }

    Some(relative)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
