use std::collections::BTreeMap;

use kube::ResourceExt;

pub const APP_KEY: &str = "app";
pub const MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "sensor-agent-operator";
pub const FIELD_MANAGER: &str = "sensor-agent-operator";

pub trait ManagedObject {
    fn managed_by(&self) -> Option<&str>;

    fn is_managed(&self) -> bool {
        matches!(self.managed_by(), Some(MANAGED_BY_VALUE))
    }
}

impl<R> ManagedObject for R
where
    R: ResourceExt,
{
    fn managed_by(&self) -> Option<&str> {
        self.labels().get(MANAGED_BY_KEY).map(String::as_str)
    }
}

/// Labels carried by every workload generated for the agent `name`.
pub fn workload_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_KEY.to_owned(), name.to_owned()),
        (MANAGED_BY_KEY.to_owned(), MANAGED_BY_VALUE.to_owned()),
    ])
}

pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_KEY.to_owned(), name.to_owned())])
}
