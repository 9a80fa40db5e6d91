//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{AuthFailure, DispatchError, Result};
use crate::http::{BindingSender, Dispatch, HttpDispatcher, OutboundMessage};
use crate::saml::constants::RSA_SHA256_SIG_ALG;
use crate::saml::{RequestSigner, StaticMetadataResolver};
use crate::source::{LoginBackend, SourceServices};
use crate::state::{AttributeSet, MemoryStateStore, StateStore};

pub const BASE_URL: &str = "https://gw.example.org";

/// Sender that records everything it dispatches.
#[derive(Default)]
pub struct RecordingSender {
    inner: HttpDispatcher,
    sent: Mutex<Vec<OutboundMessage>>,
    redirects: AtomicUsize,
    last_location: Mutex<Option<String>>,
}

impl RecordingSender {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Plain redirects, as issued by the processing chain.
    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }

    pub fn last_location(&self) -> Option<String> {
        self.last_location.lock().unwrap().clone()
    }

    fn record(&self, dispatch: &Dispatch) {
        if let Some(location) = dispatch.location() {
            *self.last_location.lock().unwrap() = Some(location.to_string());
        }
    }
}

impl BindingSender for RecordingSender {
    fn send(&self, message: &OutboundMessage) -> Result<Dispatch, DispatchError> {
        let dispatch = self.inner.send(message)?;
        self.sent.lock().unwrap().push(message.clone());
        self.record(&dispatch);
        Ok(dispatch)
    }

    fn redirect(&self, url: &str, params: &[(String, String)]) -> Result<Dispatch, DispatchError> {
        let dispatch = self.inner.redirect(url, params)?;
        self.redirects.fetch_add(1, Ordering::SeqCst);
        self.record(&dispatch);
        Ok(dispatch)
    }
}

/// Signer returning a constant signature.
#[derive(Default)]
pub struct FixedSigner {
    count: AtomicUsize,
}

impl FixedSigner {
    pub fn signed_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RequestSigner for FixedSigner {
    fn algorithm_uri(&self) -> &str {
        RSA_SHA256_SIG_ALG
    }

    fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(b"signature".to_vec())
    }
}

/// Backend accepting one username/password pair and recording calls.
pub struct RecordingBackend {
    username: String,
    password: String,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingBackend {
    pub fn accepting(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl LoginBackend for RecordingBackend {
    fn login(&self, username: &str, password: &str) -> Result<AttributeSet> {
        self.calls
            .lock()
            .unwrap()
            .push((username.to_string(), password.to_string()));
        if username == self.username && password == self.password {
            Ok(AttributeSet::from([(
                "username".to_string(),
                vec![username.to_string()],
            )]))
        } else {
            Err(AuthFailure::WrongUserPass.into())
        }
    }
}

/// Services plus typed handles on the doubles behind them.
pub struct Harness {
    pub services: SourceServices,
    pub store: Arc<dyn StateStore>,
    pub sender: Arc<RecordingSender>,
    pub signer: Arc<FixedSigner>,
}

impl Harness {
    pub fn new(metadata: StaticMetadataResolver) -> Self {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let sender = Arc::new(RecordingSender::default());
        let signer = Arc::new(FixedSigner::default());
        let services = SourceServices {
            base_url: BASE_URL.to_string(),
            store: Arc::clone(&store),
            sender: sender.clone(),
            metadata: Arc::new(metadata),
            signer: Some(signer.clone()),
        };
        Self {
            services,
            store,
            sender,
            signer,
        }
    }
}

/// Services with an empty metadata set.
pub fn services() -> SourceServices {
    Harness::new(StaticMetadataResolver::new()).services
}
