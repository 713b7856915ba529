//! The ordered command list that copies a share onto the block volume.

use shell_escape::unix::escape;

/// NFS mount options used for every share.
pub const NFS_MOUNT_OPTIONS: &str =
    "nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2";

/// One remote command and whether its failure aborts the copy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyCommand {
    /// Short name used in logs and reports.
    pub label: &'static str,
    /// Shell command run on the instance.
    pub command: String,
    /// Whether a failure makes the resulting snapshot worthless.
    pub critical: bool,
}

impl CopyCommand {
    fn critical(label: &'static str, command: String) -> Self {
        Self {
            label,
            command,
            critical: true,
        }
    }
}

/// Remote layout the commands operate on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyLayout {
    /// DNS suffix appended to the share identifier.
    pub share_dns_suffix: String,
    /// Device path of the attached block volume.
    pub block_device: String,
    /// Filesystem created on the block volume.
    pub filesystem_type: String,
    /// Directory the share is mounted on.
    pub share_mount_point: String,
    /// Directory the block volume is mounted on.
    pub snapshot_mount_point: String,
}

impl CopyLayout {
    /// NFS host serving `share_id`.
    #[must_use]
    pub fn share_host(&self, share_id: &str) -> String {
        format!("{share_id}.{}", self.share_dns_suffix)
    }

    /// Builds the eight commands for `share_id` in execution order.
    #[must_use]
    pub fn commands(&self, share_id: &str) -> Vec<CopyCommand> {
        let share_dir = escape(self.share_mount_point.as_str().into());
        let snapshot_dir = escape(self.snapshot_mount_point.as_str().into());
        let device = escape(self.block_device.as_str().into());
        let fs_type = escape(self.filesystem_type.as_str().into());
        let share_host = self.share_host(share_id);
        let host = escape(share_host.as_str().into());
        let share_contents = format!("{}/.", self.share_mount_point);
        let copy_from = escape(share_contents.as_str().into());
        let snapshot_root = format!("{}/", self.snapshot_mount_point);
        let copy_to = escape(snapshot_root.as_str().into());

        vec![
            CopyCommand {
                label: "refresh package index",
                command: String::from("sudo apt-get update -y"),
                critical: false,
            },
            CopyCommand::critical(
                "install nfs client",
                String::from("sudo DEBIAN_FRONTEND=noninteractive apt-get install -y nfs-common"),
            ),
            CopyCommand::critical("create share mount point", format!("sudo mkdir -p {share_dir}")),
            CopyCommand::critical(
                "create snapshot mount point",
                format!("sudo mkdir -p {snapshot_dir}"),
            ),
            CopyCommand::critical(
                "mount share",
                format!("sudo mount -t nfs4 -o {NFS_MOUNT_OPTIONS} {host}:/ {share_dir}"),
            ),
            CopyCommand::critical(
                "format block volume",
                format!("sudo mkfs -t {fs_type} {device}"),
            ),
            CopyCommand::critical(
                "mount block volume",
                format!("sudo mount {device} {snapshot_dir}"),
            ),
            CopyCommand::critical(
                "copy share contents",
                format!("sudo cp -Rp {copy_from} {copy_to}"),
            ),
        ]
    }
}
