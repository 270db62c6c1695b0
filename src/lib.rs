//! Template-driven retrieval of dataset elements.
//!
//! A [`grabber::Grabber`] combines a [`resolver::PathTemplateResolver`],
//! which discovers elements and resolves their files from per-type path
//! templates, with an optional [`lifecycle::RemoteDatasetLifecycleManager`]
//! that installs a DataLad dataset clone, fetches only the files an element
//! needs, and on teardown removes exactly what the session added.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod grabber;
pub mod lifecycle;
pub mod output;
pub mod pattern;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod workdir;

pub use domain::Element;
pub use error::{ErrorKind, GrabError};
pub use grabber::{ElementData, Grabber, GrabberConfig};
pub use lifecycle::{LifecycleOptions, LifecycleState, RemoteDatasetLifecycleManager};
pub use registry::GrabberRegistry;
pub use remote::{RemoteRepoClient, RemoveTarget, SystemDataladClient};
pub use resolver::{PathTemplateResolver, ResolvedAsset};
pub use workdir::{TempWorkDirs, WorkDirProvider};
