//! Per-service session state.
//!
//! One record per host, created empty at startup and populated by the
//! service's login routine. Login routines hold the write lock for their
//! whole sequence, so a second worker that races in either waits and then
//! sees the populated state, or finds it populated and returns immediately.
//! Nothing here is ever written to disk.

use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct ImxSession {
    pub logged_in: bool,
}

#[derive(Debug, Default)]
pub struct ViprSession {
    /// Upload endpoint discovered from the landing page form.
    pub endpoint: String,
    pub sess_id: String,
}

#[derive(Debug, Default)]
pub struct TurboSession {
    /// HTML5 upload endpoint scraped from the landing page script.
    pub endpoint: String,
}

#[derive(Debug, Default)]
pub struct ImageBamSession {
    pub csrf: String,
    pub upload_token: String,
}

#[derive(Debug, Default)]
pub struct ForumSession {
    pub security_token: String,
}

/// Process-wide store, shared by all workers.
#[derive(Debug, Default)]
pub struct SessionStore {
    pub imx: RwLock<ImxSession>,
    pub vipr: RwLock<ViprSession>,
    pub turbo: RwLock<TurboSession>,
    pub imagebam: RwLock<ImageBamSession>,
    pub forum: RwLock<ForumSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}
