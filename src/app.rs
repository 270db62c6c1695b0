use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::domain::Element;
use crate::error::GrabError;
use crate::grabber::{ElementData, Grabber};
use crate::registry::GrabberRegistry;
use crate::remote::RemoteRepoClient;
use crate::workdir::WorkDirProvider;

/// Command-line overrides applied on top of the registered declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOverrides {
    pub skip_id_check: bool,
    pub skip_dirty_check: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrabbersResult {
    pub grabbers: Vec<GrabberSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrabberSummary {
    pub name: String,
    pub types: Vec<String>,
    pub replacements: Vec<String>,
    pub uri: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub grabber: String,
    pub replacements: Vec<String>,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResult {
    pub grabber: String,
    pub items: Vec<ElementData>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: RemoteRepoClient + Clone> {
    registry: GrabberRegistry,
    client: C,
    workdirs: Arc<dyn WorkDirProvider>,
}

impl<C: RemoteRepoClient + Clone> App<C> {
    pub fn new(
        registry: GrabberRegistry,
        client: C,
        workdirs: Arc<dyn WorkDirProvider>,
    ) -> Self {
        Self {
            registry,
            client,
            workdirs,
        }
    }

    pub fn registry(&self) -> &GrabberRegistry {
        &self.registry
    }

    pub fn grabbers(&self) -> GrabbersResult {
        GrabbersResult {
            grabbers: self
                .registry
                .configs()
                .map(|config| GrabberSummary {
                    name: config.name.clone(),
                    types: config.effective_types(),
                    replacements: config.replacements.clone(),
                    uri: config.remote_uri.clone(),
                    local_path: config.local_path.as_ref().map(|p| p.to_string()),
                })
                .collect(),
        }
    }

    pub fn list(
        &self,
        name: &str,
        overrides: SessionOverrides,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, GrabError> {
        let mut grabber = self.open(name, overrides)?;
        let elements = run_session(&mut grabber, sink, |grabber| {
            sink.event(ProgressEvent {
                message: format!("phase=Discover; scanning {}", grabber.root()),
                elapsed: None,
            });
            grabber.list_elements()
        })?;
        Ok(ListResult {
            grabber: name.to_string(),
            replacements: grabber.replacements().to_vec(),
            elements: elements.into_iter().collect(),
        })
    }

    pub fn get(
        &self,
        name: &str,
        elements: &[Element],
        overrides: SessionOverrides,
        sink: &dyn ProgressSink,
    ) -> Result<GetResult, GrabError> {
        let mut grabber = self.open(name, overrides)?;
        let items = run_session(&mut grabber, sink, |grabber| {
            let mut items = Vec::with_capacity(elements.len());
            for element in elements {
                let started = Instant::now();
                let data = grabber.get(element)?;
                sink.event(ProgressEvent {
                    message: format!("phase=Fetch; element {element}"),
                    elapsed: Some(started.elapsed()),
                });
                items.push(data);
            }
            Ok(items)
        })?;
        Ok(GetResult {
            grabber: name.to_string(),
            items,
        })
    }

    fn open(&self, name: &str, overrides: SessionOverrides) -> Result<Grabber<C>, GrabError> {
        let mut config = self
            .registry
            .get(name)
            .ok_or_else(|| GrabError::Configuration(format!("unknown grabber {name}")))?
            .clone();
        config.lifecycle.skip_id_check |= overrides.skip_id_check;
        config.lifecycle.skip_dirty_check |= overrides.skip_dirty_check;
        let client = config.remote_uri.as_ref().map(|_| self.client.clone());
        Grabber::new(&config, client, Arc::clone(&self.workdirs))
    }
}

/// Runs `work` between `enter` and `exit`. The session is torn down even if
/// `work` fails; the first error wins.
fn run_session<C, T, F>(
    grabber: &mut Grabber<C>,
    sink: &dyn ProgressSink,
    work: F,
) -> Result<T, GrabError>
where
    C: RemoteRepoClient,
    F: FnOnce(&mut Grabber<C>) -> Result<T, GrabError>,
{
    let started = Instant::now();
    sink.event(ProgressEvent {
        message: format!("phase=Install; {}", grabber.name()),
        elapsed: None,
    });
    grabber.enter()?;
    sink.event(ProgressEvent {
        message: "phase=Install; ready".to_string(),
        elapsed: Some(started.elapsed()),
    });

    let result = work(grabber);

    sink.event(ProgressEvent {
        message: "phase=Cleanup; tearing down session".to_string(),
        elapsed: None,
    });
    let exited = grabber.exit();
    let value = result?;
    exited?;
    Ok(value)
}
