//! List/watch capability consumed by the mirrors.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{ListParams, WatchEvent, WatchParams};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;

/// One page of a full listing and the version to resume watching from
#[derive(Debug, Clone)]
pub struct ListPage<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

pub type WatchStream<K> = BoxStream<'static, kube::Result<WatchEvent<K>>>;

/// Remote store capable of listing and watching one kind of object.
///
/// `label_selector` is passed through to the server unchanged.
#[async_trait]
pub trait ListWatch<K>: Send + Sync {
    async fn list(&self, label_selector: Option<&str>) -> kube::Result<ListPage<K>>;

    async fn watch(
        &self,
        label_selector: Option<&str>,
        resource_version: &str,
    ) -> kube::Result<WatchStream<K>>;
}

#[async_trait]
impl<K> ListWatch<K> for Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, label_selector: Option<&str>) -> kube::Result<ListPage<K>> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = Api::list(self, &lp).await?;
        Ok(ListPage {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(
        &self,
        label_selector: Option<&str>,
        resource_version: &str,
    ) -> kube::Result<WatchStream<K>> {
        let mut wp = WatchParams::default();
        if let Some(selector) = label_selector {
            wp = wp.labels(selector);
        }
        let stream = Api::watch(self, &wp, resource_version).await?;
        Ok(stream.boxed())
    }
}
