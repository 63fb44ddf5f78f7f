use std::env;

use nix::unistd::{getgid, getuid, seteuid, setgid, setgroups, setuid, Gid, Uid};
use tracing::debug;

use crate::error::{Error, Result};

/// Parses the ids sudo leaves behind for the invoking user.
fn sudo_ids(uid: Option<String>, gid: Option<String>) -> Result<Option<(Uid, Gid)>> {
    let (Some(uid), Some(gid)) = (uid, gid) else {
        return Ok(None);
    };

    let uid = uid
        .trim()
        .parse()
        .map_err(|_| Error::Privileges(format!("invalid SUDO_UID {:?}", uid)))?;
    let gid = gid
        .trim()
        .parse()
        .map_err(|_| Error::Privileges(format!("invalid SUDO_GID {:?}", gid)))?;

    Ok(Some((Uid::from_raw(uid), Gid::from_raw(gid))))
}

/// Gives up root for the user that invoked us through sudo.
///
/// Without sudo (or when we are not root to begin with) there is nobody to
/// drop to and this does nothing.
pub fn drop_root() -> Result<()> {
    let ids = sudo_ids(env::var("SUDO_UID").ok(), env::var("SUDO_GID").ok())?;
    let Some((sudo_uid, sudo_gid)) = ids else {
        return Ok(());
    };
    if !getuid().is_root() {
        return Ok(());
    }

    let gid = if getgid() == Gid::from_raw(0) {
        sudo_gid
    } else {
        getgid()
    };

    setgroups(&[gid]).map_err(|e| Error::Privileges(format!("setgroups: {}", e)))?;
    setgid(gid).map_err(|e| Error::Privileges(format!("setgid: {}", e)))?;
    setuid(sudo_uid).map_err(|e| Error::Privileges(format!("setuid: {}", e)))?;

    if setuid(Uid::from_raw(0)).is_ok() || seteuid(Uid::from_raw(0)).is_ok() {
        return Err(Error::Privileges("root could be regained".into()));
    }

    debug!(uid = %sudo_uid, gid = %gid, "dropped root");
    Ok(())
}
