use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::recorder::RecorderError;

/// Final state of an object whose deletion was missed while the watch was
/// down; only its last observed JSON is known.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedFinalStateUnknown {
    pub key: String,
    pub obj: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteEvent<K> {
    Live(K),
    Tombstone(DeletedFinalStateUnknown),
}

impl<K: DeserializeOwned> DeleteEvent<K> {
    pub fn into_object(self) -> Result<K, RecorderError> {
        match self {
            DeleteEvent::Live(obj) => Ok(obj),
            DeleteEvent::Tombstone(tombstone) => serde_json::from_value(tombstone.obj)
                .map_err(|source| RecorderError::Extraction {
                    key: tombstone.key,
                    source,
                }),
        }
    }
}

pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: K);

    fn on_update(&self, old: K, new: K);

    fn on_delete(&self, event: DeleteEvent<K>);
}

fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

/// Last observed state per object, turning watch events into add, update and
/// delete callbacks.
pub struct Store<K> {
    objects: HashMap<String, K>,
    relist: Option<BTreeMap<String, K>>,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relist: None,
        }
    }
}

impl<K> Store<K>
where
    K: Resource + Clone + Serialize,
{
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn apply(&mut self, event: Event<K>, handler: &dyn EventHandler<K>) {
        match event {
            Event::Apply(obj) => self.upsert(obj, handler),
            Event::Delete(obj) => {
                self.objects.remove(&object_key(&obj));
                handler.on_delete(DeleteEvent::Live(obj));
            }
            Event::Init => self.relist = Some(BTreeMap::new()),
            Event::InitApply(obj) => {
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(object_key(&obj), obj);
            }
            Event::InitDone => self.finish_relist(handler),
        }
    }

    fn upsert(&mut self, obj: K, handler: &dyn EventHandler<K>) {
        match self.objects.insert(object_key(&obj), obj.clone()) {
            Some(old) => handler.on_update(old, obj),
            None => handler.on_add(obj),
        }
    }

    fn finish_relist(&mut self, handler: &dyn EventHandler<K>) {
        let listed = self.relist.take().unwrap_or_default();

        let mut vanished: Vec<String> = self
            .objects
            .keys()
            .filter(|key| !listed.contains_key(*key))
            .cloned()
            .collect();
        vanished.sort();
        for key in vanished {
            let Some(last) = self.objects.remove(&key) else {
                continue;
            };
            match serde_json::to_value(&last) {
                Ok(obj) => handler.on_delete(DeleteEvent::Tombstone(DeletedFinalStateUnknown {
                    key,
                    obj,
                })),
                Err(e) => error!(%key, "failed to encode last known state of deleted object: {e}"),
            }
        }

        for obj in listed.into_values() {
            self.upsert(obj, handler);
        }
    }
}

/// Watches `api` and feeds every change through `handler` until shutdown.
/// `synced` is raised once the first full list has been delivered.
pub async fn run<K>(
    api: Api<K>,
    handler: Arc<dyn EventHandler<K>>,
    synced: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<()>,
) where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut store = Store::<K>::default();
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    info!(%kind, "starting policy informer");

    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    let done = matches!(event, Event::InitDone);
                    store.apply(event, handler.as_ref());
                    if done && !synced.swap(true, Ordering::Relaxed) {
                        info!(%kind, objects = store.len(), "policy informer synced");
                    }
                }
                Some(Err(e)) => warn!(%kind, "watch error: {e}"),
                None => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    info!(%kind, "policy informer stopped");
}
