//! Test fixtures: a temporary asset tree and signed init data

#![allow(dead_code)]

use std::path::Path;

use miniapp_bot::telegram::InitDataValidator;
use tempfile::TempDir;

/// Token used by every integration test
pub const TEST_BOT_TOKEN: &str = "BOT_TOKEN_123";

/// Signs `fields` with [`TEST_BOT_TOKEN`].
pub fn signed_init_data(fields: &[(&str, &str)]) -> String {
    InitDataValidator::from_token(TEST_BOT_TOKEN).sign(fields.iter().copied())
}

/// A Mini App build in a temporary directory
///
/// # Example
/// ```ignore
/// let tree = AssetTree::new()
///     .file("app.js", b"console.log(1)")
///     .file("app.js.br", b"<brotli bytes>");
/// let server = AssetServer::new(tree.path());
/// ```
pub struct AssetTree {
    dir: TempDir,
}

impl AssetTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn file(self, relative: &str, contents: &[u8]) -> Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create asset dir");
        }
        std::fs::write(path, contents).expect("write asset");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
