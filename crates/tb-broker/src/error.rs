use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Publish failed on {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe failed on {topic}: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Broker is not connected")]
    NotConnected,
}
