use kube::CustomResourceExt as _;
use mongodb_cluster::api::v1::MongoDB;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MongoDB::crd())?);
    Ok(())
}
