use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broker::engine::lock;
use crate::broker::{ExceptionListener, ProviderConnection, ProviderError, ProviderRegistry};
use crate::client::session::{AckMode, Session, SessionShared};
use crate::config::ConnectionConfig;
use crate::utils::error::{Error, Result};

const CONNECT_ERROR: &str = "Error occurred while connecting to broker";

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened but not delivering yet.
    Created,
    Started,
    Stopped,
    Closed,
}

/// Logs asynchronous broker faults.
struct LoggingExceptionListener {
    client_id: String,
}

impl ExceptionListener for LoggingExceptionListener {
    fn on_exception(&self, error: ProviderError) {
        tracing::error!(client_id = %self.client_id, error = %error, "broker connection fault");
    }
}

struct ConnectionInner {
    client_id: String,
    provider: Box<dyn ProviderConnection>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    sessions: StdMutex<Vec<Weak<SessionShared>>>,
}

/// A handle to an open broker connection.
///
/// Cloning is cheap and every clone refers to the same connection.
/// Closing it invalidates every session, producer and consumer created from it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Opens a connection in the `Created` state.
    ///
    /// The provider is looked up in `registry` by the configured initial
    /// context factory. A client id is generated when the provider does not
    /// hand one out, and a listener that logs asynchronous faults is installed.
    pub async fn open(config: &ConnectionConfig, registry: &ProviderRegistry) -> Result<Connection> {
        let (factory, properties) = config.native_properties()?;
        let provider = registry
            .lookup(&factory)
            .map_err(|e| Error::provider(CONNECT_ERROR, e))?;
        let credentials = config.credentials();
        let connection = provider
            .connect(&properties, credentials.as_ref())
            .await
            .map_err(|e| Error::provider(CONNECT_ERROR, e))?;

        let client_id = match connection.client_id().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(e) = connection.set_client_id(&id) {
                    let _ = connection.close().await;
                    return Err(Error::provider(CONNECT_ERROR, e));
                }
                id
            }
        };
        connection.set_exception_listener(Arc::new(LoggingExceptionListener {
            client_id: client_id.clone(),
        }));

        tracing::info!(client_id = %client_id, provider = %factory, "connection opened");
        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                client_id,
                provider: connection,
                state: Mutex::new(ConnectionState::Created),
                closed: AtomicBool::new(false),
                sessions: StdMutex::new(Vec::new()),
            }),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Starts delivery. Starting a started connection is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match *state {
            ConnectionState::Started => return Ok(()),
            ConnectionState::Closed => return Err(Error::closed("Connection is closed")),
            ConnectionState::Created | ConnectionState::Stopped => {}
        }
        self.inner
            .provider
            .start()
            .await
            .map_err(|e| Error::provider("Error occurred while starting the connection", e))?;
        *state = ConnectionState::Started;
        tracing::debug!(client_id = %self.inner.client_id, "connection started");
        Ok(())
    }

    /// Halts delivery until the next [`Connection::start`].
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match *state {
            ConnectionState::Closed => return Err(Error::closed("Connection is closed")),
            ConnectionState::Stopped => return Ok(()),
            ConnectionState::Created | ConnectionState::Started => {}
        }
        self.inner
            .provider
            .stop()
            .await
            .map_err(|e| Error::provider("Error occurred while stopping the connection", e))?;
        *state = ConnectionState::Stopped;
        tracing::debug!(client_id = %self.inner.client_id, "connection stopped");
        Ok(())
    }

    /// Closes the connection and every session created from it.
    ///
    /// The provider connection goes first so that blocked receives return
    /// instead of holding their session.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if *state == ConnectionState::Closed {
            return Ok(());
        }
        *state = ConnectionState::Closed;
        self.inner.closed.store(true, Ordering::SeqCst);

        let closed = self.inner.provider.close().await;

        let sessions: Vec<Session> = lock(&self.inner.sessions)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .map(Session::from_shared)
            .collect();
        for session in sessions {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "session close after connection close");
            }
        }

        closed.map_err(|e| Error::provider("Error occurred while closing the connection", e))?;
        tracing::info!(client_id = %self.inner.client_id, "connection closed");
        Ok(())
    }

    pub async fn create_session(&self, ack_mode: AckMode) -> Result<Session> {
        Session::create(self, ack_mode).await
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("Connection is closed"));
        }
        Ok(())
    }

    pub(crate) fn provider(&self) -> &dyn ProviderConnection {
        self.inner.provider.as_ref()
    }

    pub(crate) fn register_session(&self, session: Weak<SessionShared>) {
        let mut sessions = lock(&self.inner.sessions);
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(session);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.inner.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
