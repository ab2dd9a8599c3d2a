//! statmount/listmount integration tests. Kernels before 6.8 lack both
//! syscalls; those environments skip.

use vfskit::Error;
use vfskit::Interrupt;
use vfskit::StatmountMask;

#[test]
fn listmount_then_statmount() {
    let intr = Interrupt::new();
    let ids = match vfskit::mount_ids(&intr) {
        Ok(ids) => ids,
        Err(Error::Unsupported { .. }) => {
            eprintln!("kernel lacks listmount; skipping");
            return;
        }
        Err(err) => panic!("listmount failed: {err}"),
    };
    assert!(!ids.is_empty(), "a mount namespace always has mounts");

    let mask = StatmountMask::SB_BASIC
        | StatmountMask::MOUNT_BASIC
        | StatmountMask::FS_TYPE
        | StatmountMask::MNT_POINT;
    let record = vfskit::statmount(ids[0], mask, &intr).unwrap();

    // Requested-and-acked fields are present, nothing else.
    if record.mask.contains(StatmountMask::MOUNT_BASIC) {
        assert!(record.mnt_id.is_some());
    }
    if record.mask.contains(StatmountMask::FS_TYPE) {
        assert!(record.fs_type.is_some());
    }
    if record.mask.contains(StatmountMask::MNT_POINT) {
        assert!(record.mnt_point.as_ref().is_some_and(|p| p.is_absolute()));
    }
    // Never requested, must never be filled.
    assert_eq!(record.sb_source, None);
    assert_eq!(record.opt_array, None);
}

#[test]
fn statmount_of_unknown_mount_fails() {
    let intr = Interrupt::new();
    match vfskit::statmount(u64::MAX - 7, StatmountMask::MOUNT_BASIC, &intr) {
        Err(Error::Unsupported { .. }) => eprintln!("kernel lacks statmount; skipping"),
        Err(Error::Sys { .. }) => {}
        other => panic!("expected an error, got {other:?}"),
    }
}
