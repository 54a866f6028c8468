//! Prints the StorageProbe CustomResourceDefinition as YAML.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/storageprobe.yaml
//! ```

use crds::StorageProbe;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&StorageProbe::crd())?);
    Ok(())
}
