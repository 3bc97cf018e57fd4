//! CRD YAML Generator
//!
//! Prints the CRD manifests owned by the ocm-backup-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/backup.yaml

use ocm_backup_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
