//! Watchz Engine - container-engine client.
//!
//! Talks to the container engine's HTTP API over its local stream socket.
//! Every call opens a fresh connection, writes an HTTP/1.1 request, and
//! parses the response (`Content-Length` or chunked framing). The API
//! version is negotiated once at startup and prefixed onto every path.

pub mod client;
pub mod http;
pub mod model;

pub use client::{ContainerEngine, EngineClient};
pub use http::{HttpResponse, UnixHttpClient};
pub use model::{
    Container, ContainerConfig, ContainerDetails, CreateContainerBody, CreateHostConfig,
    EndpointSettings, EngineVersion, HostConfig, ImageInfo, NetworkSettings, PortBinding,
    RestartPolicy,
};
