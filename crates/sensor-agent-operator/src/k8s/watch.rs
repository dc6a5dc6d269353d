use futures_util::{StreamExt as _, stream::BoxStream};
use kube::{
    Api, Error,
    api::{DynamicObject, WatchEvent, WatchParams},
};
use tracing::{Level, debug, instrument};

/// A single change notification for the sensor agent collection.
#[derive(Debug, Clone)]
pub enum Notification {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    Bookmark(String),
}

impl Notification {
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Added(object) | Self::Modified(object) | Self::Deleted(object) => {
                object.metadata.resource_version.as_deref()
            }
            Self::Bookmark(version) => Some(version),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Watch cursor is too old, subscription must start from scratch.")]
    Expired,

    #[error("Watch was refused ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Watch request could not be built: {0}")]
    Request(Error),

    #[error(transparent)]
    Transport(Error),
}

impl WatchError {
    fn from_status(code: u16, message: &str) -> Self {
        match code {
            410 => Self::Expired,
            code => Self::Api {
                code,
                message: message.to_owned(),
            },
        }
    }

    /// Errors that will not heal by themselves, like missing credentials, a missing CRD or
    /// watch parameters the client refuses to send.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Api {
                code: 401 | 403 | 404,
                ..
            } | Self::Request(_)
        )
    }
}

impl From<Error> for WatchError {
    fn from(error: Error) -> Self {
        match error {
            Error::Api(status) => Self::from_status(status.code, &status.message),
            error @ Error::BuildRequest(_) => Self::Request(error),
            error => Self::Transport(error),
        }
    }
}

pub type NotificationStream = BoxStream<'static, Result<Notification, WatchError>>;

pub trait WatchSource {
    /// Opens a new subscription, resuming after `cursor` or replaying every object when `None`.
    async fn subscribe(&self, cursor: Option<&str>) -> Result<NotificationStream, WatchError>;
}

pub struct KubeWatch {
    api: Api<DynamicObject>,
    timeout_seconds: u32,
}

impl KubeWatch {
    pub fn new(api: Api<DynamicObject>, timeout_seconds: u32) -> Self {
        Self {
            api,
            timeout_seconds,
        }
    }
}

impl WatchSource for KubeWatch {
    #[instrument(skip(self), err(level = Level::WARN))]
    async fn subscribe(&self, cursor: Option<&str>) -> Result<NotificationStream, WatchError> {
        let params = WatchParams::default().timeout(self.timeout_seconds);

        // Version "0" makes the api server emit an Added event for every existing object.
        let version = cursor.unwrap_or("0");
        debug!("Subscribing to sensor agents at version {}.", version);

        let events = self.api.watch(&params, version).await?;

        Ok(events.map(notification).boxed())
    }
}

fn notification(
    event: Result<WatchEvent<DynamicObject>, Error>,
) -> Result<Notification, WatchError> {
    let notification = match event? {
        WatchEvent::Added(object) => Notification::Added(object),
        WatchEvent::Modified(object) => Notification::Modified(object),
        WatchEvent::Deleted(object) => Notification::Deleted(object),
        WatchEvent::Bookmark(bookmark) => {
            Notification::Bookmark(bookmark.metadata.resource_version)
        }
        WatchEvent::Error(status) => {
            return Err(WatchError::from_status(status.code, &status.message));
        }
    };

    Ok(notification)
}
