use crate::client::Session;
use crate::message::Message;
use crate::utils::error::Result;

/// Session capability handed to a service's `on_message`.
///
/// Every call goes through the session the message arrived on, so it is
/// serialized with any other work on that session.
#[derive(Debug, Clone)]
pub struct Caller {
    session: Session,
}

impl Caller {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn commit(&self) -> Result<()> {
        self.session.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.session.rollback().await
    }

    /// Acknowledges `message` and everything consumed before it on its session.
    /// A no-op for a message that was never delivered.
    pub async fn acknowledge(&self, message: &Message) -> Result<()> {
        message.acknowledge().await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
