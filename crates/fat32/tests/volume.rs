//! Volume-level integration tests over synthetic disk images.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use fat32::{Error, ShortName, Volume};
use fatgen::{contiguous, FatImageBuilder, VolumeSpec, SECTOR};
use platform::block::BlockError;
use platform::mocks::MockBlockDevice;

/// A desktop-formatted card: MBR partition at 2048, 4 KiB clusters,
/// two 1024-sector FATs, BADAPPLE.BIN at cluster 3.
fn reference_card() -> VolumeSpec {
    VolumeSpec {
        partition_lba: 2048,
        sectors_per_cluster: 8,
        reserved_sectors: 32,
        num_fats: 2,
        sectors_per_fat: 1024,
        root_cluster: 2,
    }
}

#[test]
fn mount_and_find_behind_an_mbr_partition() {
    let spec = reference_card();
    let size = 20 + 10 * 1024 + 40_000; // 50_260 bytes
    let data = vec![0x5Au8; size];
    let clusters = contiguous(3, size.div_ceil(spec.cluster_bytes()));

    let mut builder = FatImageBuilder::new(spec);
    builder.add_file("BADAPPLE.BIN", &data, &clusters);
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(vol.fat_start(), 2048 + 32);
    assert_eq!(vol.data_start(), 2048 + 32 + 2 * 1024);
    assert_eq!(vol.cluster_bytes(), 4096);

    let info = vol
        .find(&mut dev, &ShortName::from_path("BADAPPLE.BIN"))
        .expect("find");
    assert_eq!(info.first_cluster, 3);
    assert_eq!(info.size, 50_260);
}

#[test]
fn mounts_a_super_floppy() {
    let spec = VolumeSpec {
        partition_lba: 0,
        ..VolumeSpec::default()
    };
    let mut builder = FatImageBuilder::new(spec);
    builder.add_file("A.TXT", b"x", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(vol.partition_lba(), 0);
    assert!(vol
        .find(&mut dev, &ShortName::from_path("A.TXT"))
        .is_ok());
}

#[test]
fn rejects_a_missing_boot_signature() {
    let image = vec![0u8; 8 * SECTOR];
    let mut dev = MockBlockDevice::new(&image);
    assert_eq!(Volume::mount(&mut dev).unwrap_err(), Error::Invalid);
}

#[test]
fn rejects_a_corrupt_bpb() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("A.TXT", b"x", &contiguous(3, 1));
    let mut image = builder.build();

    // Zero sectors-per-cluster is never valid.
    let vbr = 2048 * SECTOR;
    image[vbr + 13] = 0;

    let mut dev = MockBlockDevice::new(&image);
    assert_eq!(Volume::mount(&mut dev).unwrap_err(), Error::Invalid);
}

#[test]
fn lookup_skips_deleted_and_long_name_entries() {
    let mut builder = FatImageBuilder::with_defaults();
    builder
        .add_deleted_entry()
        .add_lfn_noise()
        .add_file("MOVIE.BIN", b"payload", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    let info = vol
        .find(&mut dev, &ShortName::from_path("MOVIE.BIN"))
        .expect("find");
    assert_eq!(info.first_cluster, 3);
    assert_eq!(info.size, 7);
}

#[test]
fn lookup_reports_not_found_at_directory_end() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("MOVIE.BIN", b"payload", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(
        vol.find(&mut dev, &ShortName::from_path("OTHER.BIN")).unwrap_err(),
        Error::NotFound
    );
}

#[test]
fn chain_walk_follows_links_and_stops_at_eoc() {
    let spec = VolumeSpec::default();
    let data = vec![1u8; 3 * spec.cluster_bytes()];
    let mut builder = FatImageBuilder::new(spec);
    builder.add_file("F.BIN", &data, &[5, 9, 6]);
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(vol.next_cluster(&mut dev, 5).unwrap(), Some(9));
    assert_eq!(vol.next_cluster(&mut dev, 9).unwrap(), Some(6));
    assert_eq!(vol.next_cluster(&mut dev, 6).unwrap(), None);
}

#[test]
fn fat_entries_are_masked_to_28_bits() {
    let spec = VolumeSpec::default();
    let data = vec![1u8; 2 * spec.cluster_bytes()];
    let mut builder = FatImageBuilder::new(spec);
    builder.add_file("F.BIN", &data, &[5, 6]);
    let mut image = builder.build();

    // Set the reserved high nibble of entry 5 in both FAT copies; the
    // reader must ignore it and still resolve the link to cluster 6.
    for copy in 0..2u32 {
        let at = ((spec.fat_start() + copy * spec.sectors_per_fat) as usize * SECTOR) + 5 * 4 + 3;
        image[at] |= 0xF0;
    }

    let mut dev = MockBlockDevice::new(&image);
    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(vol.next_cluster(&mut dev, 5).unwrap(), Some(6));
}

#[test]
fn cluster_to_sector_matches_the_layout() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("F.BIN", b"z", &contiguous(5, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(
        vol.cluster_to_sector(5).unwrap(),
        vol.data_start() + 3 * u32::from(vol.sectors_per_cluster())
    );
    assert_eq!(vol.cluster_to_sector(1).unwrap_err(), Error::InvalidParam);
}

#[test]
fn rejects_an_out_of_range_root_cluster() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("A.TXT", b"x", &contiguous(3, 1));
    let mut image = builder.build();

    // Root cluster far past the data region: the mount must refuse rather
    // than let the reference reach sector arithmetic.
    let vbr = 2048 * SECTOR;
    image[vbr + 44..vbr + 48].copy_from_slice(&0x00FF_0000u32.to_le_bytes());

    let mut dev = MockBlockDevice::new(&image);
    assert_eq!(Volume::mount(&mut dev).unwrap_err(), Error::Invalid);
}

#[test]
fn out_of_range_clusters_are_rejected_before_any_arithmetic() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("A.TXT", b"x", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert!(vol.max_cluster() >= 3);

    // Values that would overflow `c * 4` or the sector product if they
    // ever reached it.
    for c in [vol.max_cluster() + 1, 0x0FFF_0000, u32::MAX] {
        assert_eq!(vol.next_cluster(&mut dev, c).unwrap_err(), Error::InvalidParam);
        assert_eq!(vol.cluster_to_sector(c).unwrap_err(), Error::InvalidParam);
    }
}

#[test]
fn lookup_rejects_entries_pointing_past_the_volume() {
    let mut builder = FatImageBuilder::with_defaults();
    builder
        .add_dangling_entry("EVIL.BIN", 0x0ABC_DEF0, 100)
        .add_file("GOOD.BIN", b"ok", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(
        vol.find(&mut dev, &ShortName::from_path("EVIL.BIN")).unwrap_err(),
        Error::Invalid
    );
    // The sibling with a sane entry is unaffected.
    assert!(vol.find(&mut dev, &ShortName::from_path("GOOD.BIN")).is_ok());
}

#[test]
fn lookup_masks_reserved_high_bits_of_the_first_cluster() {
    let mut builder = FatImageBuilder::with_defaults();
    builder
        .add_dangling_entry("HIGH.BIN", 0xF000_0003, 2)
        .add_file("REAL.BIN", b"ok", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    let info = vol
        .find(&mut dev, &ShortName::from_path("HIGH.BIN"))
        .expect("find");
    assert_eq!(info.first_cluster, 3, "reserved top nibble must be masked");
}

#[test]
fn a_corrupt_fat_link_is_reported_not_followed() {
    let spec = VolumeSpec::default();
    let data = vec![7u8; 2 * spec.cluster_bytes()];
    let mut builder = FatImageBuilder::new(spec);
    builder.add_file("F.BIN", &data, &[3, 4]);
    let mut image = builder.build();

    // Entry 3 now points far outside the data region (but below the EOC
    // range) in both FAT copies.
    for copy in 0..2u32 {
        let at = (spec.fat_start() + copy * spec.sectors_per_fat) as usize * SECTOR + 3 * 4;
        image[at..at + 4].copy_from_slice(&0x00FF_0000u32.to_le_bytes());
    }

    let mut dev = MockBlockDevice::new(&image);
    let mut vol = Volume::mount(&mut dev).expect("mount");
    assert_eq!(vol.next_cluster(&mut dev, 3).unwrap_err(), Error::Invalid);
}

#[test]
fn storage_failures_surface_as_read_errors() {
    let mut builder = FatImageBuilder::with_defaults();
    builder.add_file("F.BIN", b"z", &contiguous(3, 1));
    let image = builder.build();
    let mut dev = MockBlockDevice::new(&image);

    let mut vol = Volume::mount(&mut dev).expect("mount");
    dev.fail_after = Some(0);
    assert_eq!(
        vol.find(&mut dev, &ShortName::from_path("F.BIN")).unwrap_err(),
        Error::Read(BlockError::Read)
    );
}
