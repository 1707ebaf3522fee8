//! Prints the CustomResourceDefinitions owned by the init-agent as YAML.

use crds::{InitTarget, InitTemplate};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [InitTarget::crd(), InitTemplate::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
