//! CRD YAML Generator
//!
//! Prints the NamespaceConfig, UserConfig and GroupConfig CRD manifests.
//!
//! Usage: cargo run --bin crdgen > config/crd/bases/all.yaml

use namespace_configuration_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
