//! Built-in end-to-end tests.
//!
//! | Test | Cluster | Constraints |
//! |------|---------|-------------|
//! | `basic.boot` | 1 | none |
//! | `basic.reboot.persist` | 1 | none |
//! | `coreos.ignition.v2.ssh.key` | 1 | not on `qemu`; keys only through the boot configuration |
//! | `rhcos.luks.tpm` | 1 | `qemu-unpriv`, `rhcos`; not on `s390x`, `ppc64le` |
//! | `rhcos.luks.tang` | 1 | as above |
//! | `rhcos.luks.sss` | 1 | as above |
//!
//! The LUKS tests check that the root filesystem is encrypted and bound
//! through clevis with the given pin, then reboot and check that it
//! unlocks again without intervention.

use futures::FutureExt;
use serde_json::json;

use crate::cluster::{TestCluster, TestOutcome};
use crate::register::{Descriptor, Flag, RegisterError, Registry, empty};

const LUKS_DEVICE: &str = "/dev/disk/by-partlabel/luks_root";
const REBOOT_MARKER: &str = "sortie-reboot-marker";

// No TPM emulation for these in qemu.
const LUKS_EXCLUDED_ARCHES: [&str; 2] = ["s390x", "ppc64le"];

/// clevis.json contents as data URLs.
mod clevis {
    /// `{}`
    pub const TPM2: &str = "data:text/plain;base64,e30K";
    /// Tang server binding.
    pub const TANG: &str = "data:text/plain;base64,ewogInVybCI6ICJodHRwczovL3RhbmcuZGFya211Z2dsZS5vcmciLAogInRocCI6ICJaUmJYeVJjR3cwOHpsVExHalJZVmFoU1pHdTAiCn0K";
    /// Threshold of 2 over tpm2 and tang.
    pub const SSS: &str = "data:text/plain;base64,eyAgInQiOiAyLAogICAicGlucyI6IHsKICAgICAgInRwbTIiOiB7fSwKICAgICAgInRhbmciOiB7CiAgICAgICAgInVybCI6ICJodHRwczovL3RhbmcuZGFya211Z2dsZS5vcmciLAogICAgICAgICJ0aHAiOiAiWlJiWHlSY0d3MDh6bFRMR2pSWVZhaFNaR3UwIgogICAgICB9CiAgIH0KfQo=";
}

/// Registers every built-in test.
pub fn register_all(registry: &mut Registry) -> Result<(), RegisterError> {
    registry.register(
        Descriptor::new("basic.boot", |c| boot(c).boxed()).with_cluster_size(1),
    )?;

    registry.register(
        Descriptor::new("basic.reboot.persist", |c| reboot_persist(c).boxed())
            .with_cluster_size(1),
    )?;

    // SSH key injection through the boot configuration alone.
    registry.register(
        Descriptor::new("coreos.ignition.v2.ssh.key", empty)
            .with_cluster_size(1)
            .with_exclude_platforms(["qemu"])
            .with_flag(Flag::NoSshKeyInMetadata)
            .with_user_data(json!({ "ignition": { "version": "2.0.0" } }).to_string()),
    )?;

    registry.register(luks("rhcos.luks.tpm", clevis::TPM2, |c| luks_tpm(c).boxed()))?;
    registry.register(luks("rhcos.luks.tang", clevis::TANG, |c| luks_tang(c).boxed()))?;
    registry.register(luks("rhcos.luks.sss", clevis::SSS, |c| luks_sss(c).boxed()))?;

    Ok(())
}

fn luks<F>(name: &str, clevis_source: &str, run: F) -> Descriptor
where
    F: for<'a> Fn(&'a TestCluster) -> futures::future::BoxFuture<'a, TestOutcome>
        + Send
        + Sync
        + 'static,
{
    Descriptor::new(name, run)
        .with_cluster_size(1)
        .with_platforms(["qemu-unpriv"])
        .with_distros(["rhcos"])
        .with_exclude_architectures(LUKS_EXCLUDED_ARCHES)
        .with_user_data(clevis_ignition(clevis_source))
}

/// Ignition config that drops `/etc/clevis.json` with the given contents.
fn clevis_ignition(source: &str) -> String {
    json!({
        "ignition": { "version": "2.2.0" },
        "storage": {
            "files": [{
                "filesystem": "root",
                "path": "/etc/clevis.json",
                "contents": { "source": source },
                "mode": 0o644,
            }]
        }
    })
    .to_string()
}

async fn boot(c: &TestCluster) -> TestOutcome {
    let m = c.machine(0)?;
    let out = c.must_ssh(m.as_ref(), "echo up").await?;
    c.must_match("^up", &out)
}

async fn reboot_persist(c: &TestCluster) -> TestOutcome {
    let m = c.machine(0)?;
    c.must_ssh(m.as_ref(), &format!("echo persisted > {}", REBOOT_MARKER))
        .await?;

    m.reboot().await?;

    let out = c.must_ssh(m.as_ref(), &format!("cat {}", REBOOT_MARKER)).await?;
    c.must_match("^persisted$", out.trim_ascii())
}

async fn luks_tpm(c: &TestCluster) -> TestOutcome {
    luks_check(c, "tpm2", false).await
}

async fn luks_tang(c: &TestCluster) -> TestOutcome {
    luks_check(c, "tang", true).await
}

async fn luks_sss(c: &TestCluster) -> TestOutcome {
    luks_check(c, "sss", true).await
}

/// Checks encryption and pin binding, then that the volume unlocks after
/// a reboot. Network pins need `rd.neednet=1` to reach the tang server
/// from the initramfs.
async fn luks_check(c: &TestCluster, pin: &str, needs_network: bool) -> TestOutcome {
    let m = c.machine(0)?;
    let dump_cmd = format!("sudo cryptsetup luksDump {}", LUKS_DEVICE);

    let dump = c.must_ssh(m.as_ref(), &dump_cmd).await?;
    c.must_match("Cipher: *aes", &dump)?;
    c.must_not_match("Cipher: *cipher_null-ecb", &dump)?;
    c.must_match("0: *clevis", &dump)?;
    c.must_not_match("9: *coreos", &dump)?;

    let journal = c
        .must_ssh(
            m.as_ref(),
            &format!(
                "sudo journalctl -q -b -u coreos-encrypt --grep=pin={}",
                pin
            ),
        )
        .await?;
    c.must_match(&format!("pin={}", pin), &journal)?;

    if needs_network {
        c.must_ssh(m.as_ref(), "sudo rpm-ostree kargs --append rd.neednet=1")
            .await?;
    }

    m.reboot().await?;

    let dump = c.must_ssh(m.as_ref(), &dump_cmd).await?;
    c.must_match("Cipher: *aes", &dump)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalPlatformConfig;
    use crate::harness::{Harness, HarnessOptions, TestStatus};
    use crate::platform::Flight;
    use crate::platform::local::LocalFlight;
    use crate::report::NullReporter;
    use crate::selector::{Selection, SkipReason, Target, list_eligible};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        register_all(&mut registry).unwrap();
        registry.close();
        registry
    }

    fn verdict(registry: &Registry, target: &Target, name: &str) -> Selection {
        list_eligible(registry, target)
            .unwrap()
            .into_iter()
            .find(|l| l.name == name)
            .map(|l| l.selection)
            .unwrap()
    }

    #[test]
    fn test_register_all() {
        let registry = registry();
        assert_eq!(registry.len(), 6);

        let key = registry.get("coreos.ignition.v2.ssh.key").unwrap();
        assert!(key.has_flag(Flag::NoSshKeyInMetadata));
        assert_eq!(key.user_data(), Some(r#"{"ignition":{"version":"2.0.0"}}"#));

        let tpm = registry.get("rhcos.luks.tpm").unwrap();
        let user_data: serde_json::Value =
            serde_json::from_str(tpm.user_data().unwrap()).unwrap();
        assert_eq!(user_data["storage"]["files"][0]["path"], "/etc/clevis.json");
        assert_eq!(user_data["storage"]["files"][0]["mode"], 420);
    }

    #[test]
    fn test_registering_twice_is_rejected() {
        let mut registry = Registry::new();
        register_all(&mut registry).unwrap();
        assert!(matches!(
            register_all(&mut registry),
            Err(RegisterError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_luks_selection() {
        let registry = registry();

        let qemu = Target::new("qemu-unpriv", "rhcos", "x86_64");
        assert_eq!(verdict(&registry, &qemu, "rhcos.luks.sss"), Selection::Eligible);

        let s390x = Target::new("qemu-unpriv", "rhcos", "s390x");
        assert_eq!(
            verdict(&registry, &s390x, "rhcos.luks.tpm"),
            Selection::Skip(SkipReason::ArchitectureExcluded)
        );

        let fcos = Target::new("qemu-unpriv", "fcos", "x86_64");
        assert_eq!(
            verdict(&registry, &fcos, "rhcos.luks.tang"),
            Selection::Skip(SkipReason::DistroMismatch)
        );
    }

    #[test]
    fn test_ssh_key_not_on_qemu() {
        let registry = registry();
        let qemu = Target::new("qemu", "rhcos", "x86_64");
        assert_eq!(
            verdict(&registry, &qemu, "coreos.ignition.v2.ssh.key"),
            Selection::Skip(SkipReason::PlatformExcluded)
        );
        let aws = Target::new("aws", "rhcos", "x86_64");
        assert_eq!(
            verdict(&registry, &aws, "coreos.ignition.v2.ssh.key"),
            Selection::Eligible
        );
    }

    #[tokio::test]
    async fn test_basic_tests_pass_on_local_flight() {
        let flight = LocalFlight::new(&LocalPlatformConfig {
            reboot_timeout_secs: 10,
            ..Default::default()
        })
        .unwrap();
        let harness = Harness::new(flight, NullReporter, HarnessOptions::default());
        let target = Target::new("local", "rhcos", crate::util::host_arch())
            .with_patterns(["basic.*", "coreos.*"])
            .unwrap();

        let run = harness.run(&registry(), &target).await.unwrap();

        for result in &run.results {
            let expected = if result.name.starts_with("rhcos.") {
                TestStatus::Skip
            } else {
                TestStatus::Pass
            };
            assert_eq!(result.status, expected, "{}: {:?}", result.name, result.message);
        }
        assert_eq!((run.passed, run.skipped), (3, 3));
        assert_eq!(harness.flight().live_clusters(), 0);
    }
}
