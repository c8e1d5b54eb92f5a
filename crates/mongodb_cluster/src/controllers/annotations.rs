use kube::ResourceExt;
use tracing::debug;

use crate::api::v1::MongoDB;
use crate::client::ResourceClient;
use crate::util::errors::Result;

/// Sets `annotations` on the live MongoDB resource, on top of the existing ones.
///
/// Reads the resource again so the update carries its current `resourceVersion`,
/// and skips the write when every value is already in place.
pub async fn set_annotations<C: ResourceClient>(
    client: &C,
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
) -> Result<()> {
    let mut mdb = client.get::<MongoDB>(namespace, name).await?;
    let current = mdb.annotations();
    if annotations
        .iter()
        .all(|(key, value)| current.get(*key).map(String::as_str) == Some(*value))
    {
        return Ok(());
    }

    let current = mdb.annotations_mut();
    for (key, value) in annotations {
        debug!(mongodb = %name, annotation = %key, value = %value, "setting annotation");
        current.insert(key.to_string(), value.to_string());
    }
    client.update(namespace, &mdb).await?;
    Ok(())
}
