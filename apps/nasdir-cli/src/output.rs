//! Record formatting for command output.

use nasdir_directory::{LocalGroup, LocalUser};

/// passwd(5) style line.
pub fn user_line(user: &LocalUser) -> String {
    format!(
        "{}:*:{}:{}:{}:{}:{}",
        user.name, user.uid, user.gid, user.gecos, user.home_dir, user.shell
    )
}

/// group(5) style line.
pub fn group_line(group: &LocalGroup) -> String {
    format!("{}:*:{}:{}", group.name, group.gid, group.members.join(","))
}
