//! Concrete implementations of the core's `Collaborators` trait objects, wired together in
//! `main.rs`. Kept in the binary crate since they are the one part of the system that actually
//! talks to Kubernetes, the filesystem, and the network - everything the core crate is built to
//! stay ignorant of.

pub mod dataplane_client;
pub mod haproxy_validator;
pub mod informer;
pub mod jsonpath;
pub mod kube_client;
pub mod leader_election;
pub mod template_engine;
