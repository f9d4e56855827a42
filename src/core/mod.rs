pub mod audio;
pub mod live;

pub use audio::{AudioConverter, ContainerFormat, ConversionError};
pub use live::{
    AuthError, BridgeState, CredentialIssuer, CredentialToken, LiveConnection, LiveConnector,
    LiveError, LiveSink, LiveSource, RemoteEvent, UpstreamBridge, UpstreamCommand, UpstreamEvent,
};
