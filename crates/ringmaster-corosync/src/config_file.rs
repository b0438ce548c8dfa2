//! Transport configuration and ifcfg persistence

use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use ringmaster_common::{HaError, Result};

use crate::interface::RingInterface;

pub const DEFAULT_TRANSPORT_CONFIG: &str = "/etc/corosync/corosync.conf";
pub const DEFAULT_IFCFG_DIR: &str = "/etc/sysconfig/network-scripts";

/// `<path>.old`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".old");
    PathBuf::from(name)
}

/// Atomically replace `path` with `content`, keeping the previous file as
/// `<path>.old`.
///
/// The content goes to a temp file in the same directory first, then is
/// renamed over the target, so readers see either the old or the new file
/// in full.
pub fn write_config_file(path: &Path, content: &str, mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;

    let backup = backup_path(path);
    match fs::copy(path, &backup) {
        Ok(_) => debug!("Saved {} as {}", path.display(), backup.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    tmp.persist(path).map_err(|e| HaError::Io(e.error))?;
    Ok(())
}

pub fn write_transport_config(path: &Path, content: &str) -> Result<()> {
    write_config_file(path, content, 0o644)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Delete the transport config; a missing file is already the goal state
pub fn remove_transport_config(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HaError::configuration(format!(
            "Unable to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

fn ring_block(ring: &RingInterface) -> Result<String> {
    let network = ring.require_ipv4()?.network();
    let port = ring.mcast_port.ok_or_else(|| {
        HaError::configuration(format!("ring{} ({}) has no multicast port", ring.ring_number, ring.name))
    })?;
    Ok(format!(
        "\tinterface {{\n\
         \t\tringnumber: {}\n\
         \t\tbindnetaddr: {}\n\
         \t\tmcastaddr: {}\n\
         \t\tmcastport: {}\n\
         \t\tttl: 1\n\
         \t}}\n",
        ring.ring_number,
        network,
        ring.mcast_addr(),
        port
    ))
}

/// Render corosync.conf for the given rings, in ring order
pub fn render_transport_config(rings: &[RingInterface]) -> Result<String> {
    if rings.is_empty() {
        return Err(HaError::configuration("no rings to configure"));
    }
    let mut interfaces = String::new();
    for ring in rings {
        interfaces.push_str(&ring_block(ring)?);
    }
    let rrp_mode = if rings.len() > 1 { "passive" } else { "none" };

    Ok(format!(
        "# Managed by ringmaster; local edits are replaced on reconfiguration\n\
         totem {{\n\
         \tversion: 2\n\
         \tsecauth: off\n\
         \tthreads: 0\n\
         \ttoken: 5000\n\
         \ttoken_retransmits_before_loss_const: 10\n\
         \tmax_messages: 20\n\
         \trrp_mode: {rrp_mode}\n\
         {interfaces}\
         }}\n\
         \n\
         logging {{\n\
         \tfileline: off\n\
         \tto_stderr: no\n\
         \tto_logfile: no\n\
         \tto_syslog: yes\n\
         \tdebug: off\n\
         \ttimestamp: on\n\
         }}\n\
         \n\
         amf {{\n\
         \tmode: disabled\n\
         }}\n\
         \n\
         service {{\n\
         \tname: pacemaker\n\
         \tver: 1\n\
         }}\n"
    ))
}

/// Persist the interface's current address as `ifcfg-<dev>` in `dir`
pub fn write_ifcfg(dir: &Path, iface: &RingInterface) -> Result<PathBuf> {
    let net = iface.require_ipv4()?;
    let path = dir.join(format!("ifcfg-{}", iface.name));
    let content = format!(
        "DEVICE={}\nHWADDR={}\nBOOTPROTO=static\nIPADDR={}\nNETMASK={}\nONBOOT=yes\n",
        iface.name,
        iface.mac_address,
        net.addr,
        net.netmask()
    );
    write_config_file(&path, &content, 0o644)?;
    info!("Persisted {} to {}", net, path.display());
    Ok(path)
}
