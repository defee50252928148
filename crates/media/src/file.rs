//! Positional media reads over a FAT32 file.
//!
//! Two access paths:
//!
//! * **Contiguous.** When the cluster chain is one ascending run, every
//!   logical offset maps to `first_sector + off / 512` and aligned spans go
//!   straight from the card into the caller's buffer, up to
//!   [`MAX_MULTIBLOCK`] blocks per transfer. Ragged heads and tails bounce
//!   through the volume scratch sector.
//! * **Fragmented.** Offsets resolve through the FAT with a forward cache of
//!   the last cluster touched, so the sequential access pattern of playback
//!   walks each link once. Everything bounces through the scratch sector.
//!
//! Audio leaves this module already converted to 12-bit DAC words; a failed
//! read degrades to a full buffer of silence so the DAC never starves.

use core::sync::atomic::{fence, Ordering};

use fat32::{ShortName, Volume};
use platform::block::BlockDevice;
use platform::layout::{
    AUDIO_HALF_SAMPLES, BLOCK_SIZE, DAC_SILENCE, FRAME_BYTES, MAX_MULTIBLOCK, PCM_SCRATCH_BYTES,
};
use platform::types::VolumePercent;

use crate::header::MediaHeader;
use crate::sample::pcm_to_dac;
use crate::Error;

/// Extra chain links tolerated beyond the size-derived cluster count before
/// the walk is declared corrupt.
const CHAIN_SLACK: u32 = 10;

/// The file's on-disk extent: cluster layout plus the forward walk cache.
///
/// Separate from [`MediaFile`] so positional reads can run while the PCM
/// staging buffer is borrowed.
struct Extent {
    first_cluster: u32,
    size: u32,
    /// First absolute sector when the file is one contiguous run.
    contiguous_first_sector: Option<u32>,
    /// Forward cache: last resolved cluster and its index in the chain.
    /// `cached_cluster == 0` marks the cache invalid.
    cached_cluster: u32,
    cached_index: u32,
}

impl Extent {
    /// Read up to `out.len()` bytes at logical offset `off`; short only at
    /// end of file.
    #[allow(clippy::arithmetic_side_effects)] // done < n <= out.len() and off + n <= size hold throughout the loop
    #[allow(clippy::indexing_slicing)] // segment bounds derive from the same n
    fn read_at<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        off: u32,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        if off >= self.size {
            return Ok(0);
        }
        let n = out.len().min((self.size - off) as usize);
        let mut done = 0usize;

        while done < n {
            let cur = off + done as u32;
            let segment = &mut out[done..n];
            done += if let Some(first_sector) = self.contiguous_first_sector {
                Self::read_contiguous(vol, dev, first_sector, cur, segment)?
            } else {
                self.read_fragmented(vol, dev, cur, segment)?
            };
        }
        Ok(n)
    }

    /// One segment on the contiguous path. Returns bytes consumed.
    #[allow(clippy::arithmetic_side_effects)] // cur < size and first_sector + size/512 are inside the data region
    #[allow(clippy::indexing_slicing)] // so + take <= 512 and take <= out.len() by construction
    fn read_contiguous<D: BlockDevice>(
        vol: &mut Volume,
        dev: &mut D,
        first_sector: u32,
        cur: u32,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let sector = first_sector + cur / BLOCK_SIZE as u32;
        let so = (cur % BLOCK_SIZE as u32) as usize;

        // Ragged head or short tail: bounce through the scratch sector.
        if so != 0 || out.len() < BLOCK_SIZE {
            let take = out.len().min(BLOCK_SIZE - so);
            let sec = vol.read_sector(dev, sector)?;
            out[..take].copy_from_slice(&sec[so..so + take]);
            return Ok(take);
        }

        // Aligned whole blocks straight into the caller's buffer.
        let k = (out.len() / BLOCK_SIZE).min(MAX_MULTIBLOCK);
        if k >= 2 {
            dev.read_blocks(sector, &mut out[..k * BLOCK_SIZE])?;
        } else {
            let block: &mut [u8; BLOCK_SIZE] = (&mut out[..BLOCK_SIZE])
                .try_into()
                .map_err(|_| Error::InvalidParam)?;
            dev.read_block(sector, block)?;
        }
        Ok(k * BLOCK_SIZE)
    }

    /// One segment on the fragmented path. Returns bytes consumed.
    #[allow(clippy::arithmetic_side_effects)] // index <= target_index <= size / cluster_bytes; sector offsets stay inside one cluster
    #[allow(clippy::indexing_slicing)] // so + take <= 512 and take <= out.len() by construction
    fn read_fragmented<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        cur: u32,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let cluster_bytes = vol.cluster_bytes();
        let target_index = cur / cluster_bytes;

        // Forward cache: resume the walk when the target is at or past it.
        let (mut cluster, mut index) =
            if self.cached_cluster != 0 && self.cached_index <= target_index {
                (self.cached_cluster, self.cached_index)
            } else {
                (self.first_cluster, 0)
            };
        while index < target_index {
            cluster = vol.next_cluster(dev, cluster)?.ok_or(Error::Read)?;
            index += 1;
        }
        self.cached_cluster = cluster;
        self.cached_index = index;

        let within = cur % cluster_bytes;
        let sector = vol.cluster_to_sector(cluster)? + within / BLOCK_SIZE as u32;
        let so = (within % BLOCK_SIZE as u32) as usize;
        let take = out.len().min(BLOCK_SIZE - so);

        let sec = vol.read_sector(dev, sector)?;
        out[..take].copy_from_slice(&sec[so..so + take]);
        Ok(take)
    }
}

/// An open media file plus its read cursor and layout knowledge.
pub struct MediaFile {
    header: MediaHeader,
    extent: Extent,
    current_sample: u32,
    volume_percent: VolumePercent,
    /// Set when contiguity detection tripped the corruption bound and the
    /// reader fell back to the fragmented path.
    chain_suspect: bool,
    /// Staging for one half-buffer of interleaved PCM bytes.
    pcm: [u8; PCM_SCRATCH_BYTES],
}

impl MediaFile {
    /// Look up `name` in the volume root, parse and validate the header, and
    /// probe the cluster layout.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the file is absent, [`Error::BadHeader`]
    /// when the header is malformed or disagrees with the directory size,
    /// [`Error::Read`] on storage failure.
    pub fn open<D: BlockDevice>(
        vol: &mut Volume,
        dev: &mut D,
        name: &ShortName,
    ) -> Result<Self, Error> {
        let info = vol.find(dev, name)?;
        if (info.size as usize) < MediaHeader::BYTES || info.first_cluster < 2 {
            return Err(Error::BadHeader);
        }

        let first_sector = vol.cluster_to_sector(info.first_cluster)?;
        let sector = vol.read_sector(dev, first_sector)?;
        let mut raw = [0u8; MediaHeader::BYTES];
        raw.copy_from_slice(&sector[..MediaHeader::BYTES]);
        let header = MediaHeader::parse(&raw)?;

        // The directory size must cover everything the header promises.
        let expected_end = header
            .audio_offset()
            .checked_add(header.audio_size)
            .ok_or(Error::BadHeader)?;
        if expected_end > info.size {
            return Err(Error::BadHeader);
        }

        let mut file = Self {
            header,
            extent: Extent {
                first_cluster: info.first_cluster,
                size: info.size,
                contiguous_first_sector: None,
                cached_cluster: info.first_cluster,
                cached_index: 0,
            },
            current_sample: 0,
            volume_percent: VolumePercent::FULL,
            chain_suspect: false,
            pcm: [0; PCM_SCRATCH_BYTES],
        };

        match file.detect_layout(vol, dev) {
            Ok(first) => file.extent.contiguous_first_sector = first,
            // A chain past the safety bound is reported but not fatal: the
            // fragmented path re-walks it bounded by the file size.
            Err(Error::CorruptChain) => file.chain_suspect = true,
            Err(e) => return Err(e),
        }

        Ok(file)
    }

    /// Walk the chain from the first cluster; an ascending run to
    /// end-of-chain enables the fast path.
    #[allow(clippy::arithmetic_side_effects)] // count is bounded by the expected + slack guard; expected <= size / 512 + 1
    fn detect_layout<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
    ) -> Result<Option<u32>, Error> {
        let expected = self.extent.size.div_ceil(vol.cluster_bytes()).max(1);
        let mut prev = self.extent.first_cluster;
        let mut count = 1u32;

        loop {
            let next = match vol.next_cluster(dev, prev) {
                Ok(next) => next,
                // A link pointing outside the volume is chain corruption,
                // the same verdict as overrunning the length bound.
                Err(fat32::Error::Invalid | fat32::Error::InvalidParam) => {
                    return Err(Error::CorruptChain)
                }
                Err(e) => return Err(e.into()),
            };
            match next {
                None => return Ok(Some(vol.cluster_to_sector(self.extent.first_cluster)?)),
                Some(c) if c != prev + 1 => return Ok(None),
                Some(c) => {
                    prev = c;
                    count += 1;
                    if count > expected + CHAIN_SLACK {
                        return Err(Error::CorruptChain);
                    }
                }
            }
        }
    }

    /// Parsed header.
    pub fn header(&self) -> &MediaHeader {
        &self.header
    }

    /// Number of video frames.
    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    /// File size in bytes, from the directory entry.
    pub fn size(&self) -> u32 {
        self.extent.size
    }

    /// True when the whole file is a single ascending cluster run.
    pub fn is_contiguous(&self) -> bool {
        self.extent.contiguous_first_sector.is_some()
    }

    /// True when contiguity detection hit the corruption bound.
    pub fn chain_suspect(&self) -> bool {
        self.chain_suspect
    }

    /// Stereo samples consumed by [`Self::read_audio`] so far.
    pub fn current_sample(&self) -> u32 {
        self.current_sample
    }

    /// Current playback volume.
    pub fn volume(&self) -> VolumePercent {
        self.volume_percent
    }

    /// Set the playback volume for subsequent audio reads.
    pub fn set_volume(&mut self, volume: VolumePercent) {
        self.volume_percent = volume;
    }

    /// Read up to `out.len()` bytes at logical offset `off`.
    ///
    /// Returns the byte count actually read, short only at end of file.
    ///
    /// # Errors
    ///
    /// [`Error::Read`] on storage failure; the output prefix may be
    /// partially written in that case.
    pub fn read_at<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        off: u32,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        self.extent.read_at(vol, dev, off, out)
    }

    /// Read video frame `index` into `frame`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParam`] for `index >= frame_count`, [`Error::Read`]
    /// on storage failure or truncation.
    #[allow(clippy::arithmetic_side_effects)] // index < frame_count keeps the offset inside the header-validated file span
    pub fn read_frame<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        index: u32,
        frame: &mut [u8; FRAME_BYTES],
    ) -> Result<(), Error> {
        if index >= self.header.frame_count {
            return Err(Error::InvalidParam);
        }
        let off = self.header.video_offset() + index * FRAME_BYTES as u32;
        if self.extent.read_at(vol, dev, off, frame)? != FRAME_BYTES {
            return Err(Error::Read);
        }
        Ok(())
    }

    /// Read the next `left.len()` stereo samples as 12-bit DAC words.
    ///
    /// The cursor advances by the samples actually present; everything past
    /// end-of-audio (and everything on a failed read) comes out as DAC
    /// silence. A data memory barrier is issued before returning because the
    /// destination is about to be handed to the DMA engine.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParam`] on mismatched or oversized buffers;
    /// [`Error::Read`] on storage failure (output fully silenced).
    #[allow(clippy::arithmetic_side_effects)] // current_sample <= total_samples = audio_size / 4, so offsets fit the header-validated span
    #[allow(clippy::indexing_slicing)] // got <= wanted <= left.len() bounds every access into pcm, left and right
    pub fn read_audio<D: BlockDevice>(
        &mut self,
        vol: &mut Volume,
        dev: &mut D,
        left: &mut [u16],
        right: &mut [u16],
    ) -> Result<(), Error> {
        if left.len() != right.len() || left.len() > AUDIO_HALF_SAMPLES {
            return Err(Error::InvalidParam);
        }
        if left.is_empty() {
            return Ok(());
        }

        let total = self.header.total_samples();
        let wanted = left.len().min(total.saturating_sub(self.current_sample) as usize);

        let got = if wanted > 0 {
            let off = self.header.audio_offset() + self.current_sample * 4;
            match self
                .extent
                .read_at(vol, dev, off, &mut self.pcm[..wanted * 4])
            {
                Ok(bytes) => bytes / 4,
                Err(e) => {
                    left.fill(DAC_SILENCE);
                    right.fill(DAC_SILENCE);
                    fence(Ordering::SeqCst);
                    return Err(e);
                }
            }
        } else {
            0
        };

        for i in 0..got {
            let l = i16::from_le_bytes([self.pcm[4 * i], self.pcm[4 * i + 1]]);
            let r = i16::from_le_bytes([self.pcm[4 * i + 2], self.pcm[4 * i + 3]]);
            left[i] = pcm_to_dac(l, self.volume_percent);
            right[i] = pcm_to_dac(r, self.volume_percent);
        }
        left[got..].fill(DAC_SILENCE);
        right[got..].fill(DAC_SILENCE);
        self.current_sample += got as u32;

        // The rings are read by DMA as soon as the caller releases them.
        fence(Ordering::SeqCst);
        Ok(())
    }
}
