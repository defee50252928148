//! In-memory FAT32 volume images and encoded media files for host tests.
//!
//! The builder produces byte-exact volume images — MBR (or super-floppy),
//! VBR/BPB, FAT copies, root directory, file data — with full control over
//! geometry and cluster placement, so the reader's contiguity detection and
//! fast path can be exercised against both friendly and hostile layouts.
//!
//! This crate is host-only tooling; nothing here ships on the target.

#![allow(missing_docs)]
// Host test tooling: panics on inconsistent builder input are the desired
// failure mode, and every offset is derived from the geometry being built.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

pub const SECTOR: usize = 512;
pub const EOC: u32 = 0x0FFF_FFFF;

/// Volume geometry. The defaults mirror a small SDHC card formatted by a
/// desktop OS: one partition at LBA 2048, 4 KiB clusters.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSpec {
    /// First partition LBA; 0 builds a super-floppy (no MBR).
    pub partition_lba: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
}

impl Default for VolumeSpec {
    fn default() -> Self {
        Self {
            partition_lba: 2048,
            sectors_per_cluster: 8,
            reserved_sectors: 32,
            num_fats: 2,
            sectors_per_fat: 64,
            root_cluster: 2,
        }
    }
}

impl VolumeSpec {
    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR
    }

    pub fn fat_start(&self) -> u32 {
        self.partition_lba + u32::from(self.reserved_sectors)
    }

    pub fn data_start(&self) -> u32 {
        self.fat_start() + u32::from(self.num_fats) * self.sectors_per_fat
    }

    /// First sector of cluster `c` (`c >= 2`).
    pub fn cluster_sector(&self, c: u32) -> u32 {
        self.data_start() + (c - 2) * u32::from(self.sectors_per_cluster)
    }
}

/// Render a `NAME.EXT` path into the 11-byte space-padded 8.3 form.
pub fn name83(name: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let mut parts = name.splitn(2, '.');
    let base = parts.next().unwrap_or("");
    let ext = parts.next().unwrap_or("");
    for (i, b) in base.bytes().take(8).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        out[8 + i] = b.to_ascii_uppercase();
    }
    out
}

/// A contiguous run of `count` clusters starting at `first`.
pub fn contiguous(first: u32, count: usize) -> Vec<u32> {
    (0..count as u32).map(|i| first + i).collect()
}

enum RootEntry {
    File {
        name: [u8; 11],
        first_cluster: u32,
        size: u32,
    },
    Deleted,
    LongNameNoise,
}

pub struct FatImageBuilder {
    spec: VolumeSpec,
    entries: Vec<RootEntry>,
    /// (cluster chain, data) pairs to materialize.
    payloads: Vec<(Vec<u32>, Vec<u8>)>,
}

impl FatImageBuilder {
    pub fn new(spec: VolumeSpec) -> Self {
        Self {
            spec,
            entries: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(VolumeSpec::default())
    }

    pub fn spec(&self) -> &VolumeSpec {
        &self.spec
    }

    /// Add a root-directory file stored in the given clusters (in chain
    /// order). The chain must hold the data and must not touch the root
    /// cluster.
    pub fn add_file(&mut self, name: &str, data: &[u8], clusters: &[u32]) -> &mut Self {
        let needed = data.len().div_ceil(self.spec.cluster_bytes()).max(1);
        assert!(
            clusters.len() >= needed,
            "chain of {} clusters cannot hold {} bytes",
            clusters.len(),
            data.len()
        );
        assert!(clusters.iter().all(|&c| c >= 2 && c != self.spec.root_cluster));

        self.entries.push(RootEntry::File {
            name: name83(name),
            first_cluster: clusters[0],
            size: data.len() as u32,
        });
        self.payloads.push((clusters.to_vec(), data.to_vec()));
        self
    }

    /// Insert a root entry whose first-cluster words and size are written
    /// verbatim, with no FAT chain or payload behind them — for
    /// corrupt-volume tests.
    pub fn add_dangling_entry(&mut self, name: &str, first_cluster: u32, size: u32) -> &mut Self {
        self.entries.push(RootEntry::File {
            name: name83(name),
            first_cluster,
            size,
        });
        self
    }

    /// Insert a deleted (0xE5) directory entry, which the reader must skip.
    pub fn add_deleted_entry(&mut self) -> &mut Self {
        self.entries.push(RootEntry::Deleted);
        self
    }

    /// Insert a long-filename fragment (attr 0x0F), which the reader must skip.
    pub fn add_lfn_noise(&mut self) -> &mut Self {
        self.entries.push(RootEntry::LongNameNoise);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let spec = &self.spec;
        let max_cluster = self
            .payloads
            .iter()
            .flat_map(|(chain, _)| chain.iter().copied())
            .max()
            .unwrap_or(spec.root_cluster)
            .max(spec.root_cluster);

        let total_sectors =
            spec.cluster_sector(max_cluster) + u32::from(spec.sectors_per_cluster);
        let mut image = vec![0u8; total_sectors as usize * SECTOR];

        if spec.partition_lba != 0 {
            write_mbr(&mut image, spec.partition_lba, total_sectors);
        }
        write_vbr(&mut image, spec, total_sectors);
        self.write_fats(&mut image);
        self.write_root_dir(&mut image);
        self.write_payloads(&mut image);
        image
    }

    fn fat_entries(&self) -> Vec<u32> {
        let spec = &self.spec;
        let mut fat = vec![0u32; spec.sectors_per_fat as usize * SECTOR / 4];
        fat[0] = 0x0FFF_FFF8; // media descriptor
        fat[1] = EOC;
        fat[spec.root_cluster as usize] = EOC;
        for (chain, _) in &self.payloads {
            for pair in chain.windows(2) {
                fat[pair[0] as usize] = pair[1];
            }
            fat[*chain.last().unwrap() as usize] = EOC;
        }
        fat
    }

    fn write_fats(&self, image: &mut [u8]) {
        let spec = &self.spec;
        let fat = self.fat_entries();
        for copy in 0..spec.num_fats {
            let base =
                (spec.fat_start() + u32::from(copy) * spec.sectors_per_fat) as usize * SECTOR;
            for (i, entry) in fat.iter().enumerate() {
                image[base + i * 4..base + i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
            }
        }
    }

    fn write_root_dir(&self, image: &mut [u8]) {
        let base = self.spec.cluster_sector(self.spec.root_cluster) as usize * SECTOR;
        for (i, entry) in self.entries.iter().enumerate() {
            let at = base + i * 32;
            let slot = &mut image[at..at + 32];
            match entry {
                RootEntry::File {
                    name,
                    first_cluster,
                    size,
                } => {
                    slot[..11].copy_from_slice(name);
                    slot[11] = 0x20; // ATTR_ARCHIVE
                    slot[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
                    slot[26..28].copy_from_slice(&(*first_cluster as u16).to_le_bytes());
                    slot[28..32].copy_from_slice(&size.to_le_bytes());
                }
                RootEntry::Deleted => {
                    slot[0] = 0xE5;
                    slot[11] = 0x20;
                }
                RootEntry::LongNameNoise => {
                    slot[0] = 0x41;
                    slot[11] = 0x0F; // ATTR_LONG_NAME
                }
            }
        }
    }

    fn write_payloads(&self, image: &mut [u8]) {
        let cb = self.spec.cluster_bytes();
        for (chain, data) in &self.payloads {
            for (i, chunk) in data.chunks(cb).enumerate() {
                let at = self.spec.cluster_sector(chain[i]) as usize * SECTOR;
                image[at..at + chunk.len()].copy_from_slice(chunk);
            }
        }
    }
}

fn write_mbr(image: &mut [u8], partition_lba: u32, total_sectors: u32) {
    let entry = 0x1BE;
    image[entry + 4] = 0x0C; // FAT32 LBA
    image[entry + 8..entry + 12].copy_from_slice(&partition_lba.to_le_bytes());
    image[entry + 12..entry + 16]
        .copy_from_slice(&(total_sectors - partition_lba).to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
}

fn write_vbr(image: &mut [u8], spec: &VolumeSpec, total_sectors: u32) {
    let base = spec.partition_lba as usize * SECTOR;
    let vbr = &mut image[base..base + SECTOR];
    vbr[0] = 0xEB;
    vbr[1] = 0x58;
    vbr[2] = 0x90;
    vbr[3..11].copy_from_slice(b"MSDOS5.0");
    vbr[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    vbr[13] = spec.sectors_per_cluster;
    vbr[14..16].copy_from_slice(&spec.reserved_sectors.to_le_bytes());
    vbr[16] = spec.num_fats;
    vbr[32..36].copy_from_slice(&(total_sectors - spec.partition_lba).to_le_bytes());
    vbr[36..40].copy_from_slice(&spec.sectors_per_fat.to_le_bytes());
    vbr[44..48].copy_from_slice(&spec.root_cluster.to_le_bytes());
    vbr[510] = 0x55;
    vbr[511] = 0xAA;
}

// ── Media file encoding ──────────────────────────────────────────────────────

/// Encode a media file: 20-byte header, raw 1024-byte frames, interleaved
/// stereo i16 PCM.
pub fn encode_media(frames: &[[u8; 1024]], pcm_interleaved: &[i16], sample_rate: u32) -> Vec<u8> {
    assert_eq!(pcm_interleaved.len() % 2, 0, "stereo PCM must interleave L,R");
    let audio_size = (pcm_interleaved.len() * 2) as u32;
    let mut out = Vec::with_capacity(20 + frames.len() * 1024 + audio_size as usize);
    out.extend((frames.len() as u32).to_le_bytes());
    out.extend(audio_size.to_le_bytes());
    out.extend(sample_rate.to_le_bytes());
    out.extend(2u32.to_le_bytes());
    out.extend(16u32.to_le_bytes());
    for frame in frames {
        out.extend_from_slice(frame);
    }
    for s in pcm_interleaved {
        out.extend(s.to_le_bytes());
    }
    out
}

/// A recognizable test frame: every byte is `(frame_index * 31 + column) & 0xFF`.
pub fn pattern_frame(index: usize) -> [u8; 1024] {
    core::array::from_fn(|i| ((index * 31 + i) & 0xFF) as u8)
}

/// A deterministic full-scale-ish stereo ramp, `samples` stereo pairs long.
pub fn ramp_pcm(samples: usize) -> Vec<i16> {
    (0..samples)
        .flat_map(|i| {
            let l = ((i as i32 * 523) % 65536 - 32768) as i16;
            let r = ((i as i32 * 271) % 65536 - 32768) as i16;
            [l, r]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name83_pads_and_uppercases() {
        assert_eq!(&name83("badapple.bin"), b"BADAPPLEBIN");
        assert_eq!(&name83("a.b"), b"A       B  ");
        assert_eq!(&name83("noext"), b"NOEXT      ");
    }

    #[test]
    fn image_carries_signatures_and_bpb() {
        let mut b = FatImageBuilder::with_defaults();
        b.add_file("hello.txt", b"hi", &contiguous(3, 1));
        let img = b.build();

        assert_eq!(&img[510..512], &[0x55, 0xAA]);
        let part = 2048 * SECTOR;
        assert_eq!(&img[part + 510..part + 512], &[0x55, 0xAA]);
        assert_eq!(u16::from_le_bytes([img[part + 11], img[part + 12]]), 512);
        assert_eq!(img[part + 13], 8);
    }

    #[test]
    fn chains_are_linked_in_the_fat() {
        let spec = VolumeSpec::default();
        let mut b = FatImageBuilder::new(spec);
        let data = vec![7u8; 3 * spec.cluster_bytes()];
        b.add_file("f.bin", &data, &[5, 9, 6]);
        let img = b.build();

        let fat = spec.fat_start() as usize * SECTOR;
        let entry = |c: usize| {
            u32::from_le_bytes([
                img[fat + c * 4],
                img[fat + c * 4 + 1],
                img[fat + c * 4 + 2],
                img[fat + c * 4 + 3],
            ])
        };
        assert_eq!(entry(5), 9);
        assert_eq!(entry(9), 6);
        assert_eq!(entry(6), EOC);
    }

    #[test]
    fn media_header_layout() {
        let frames = [pattern_frame(0)];
        let pcm = ramp_pcm(4);
        let media = encode_media(&frames, &pcm, 32_000);
        assert_eq!(u32::from_le_bytes(media[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(media[4..8].try_into().unwrap()), 16);
        assert_eq!(u32::from_le_bytes(media[8..12].try_into().unwrap()), 32_000);
        assert_eq!(u32::from_le_bytes(media[12..16].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(media[16..20].try_into().unwrap()), 16);
        assert_eq!(media.len(), 20 + 1024 + 16);
    }
}
