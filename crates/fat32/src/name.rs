//! 8.3 short-name rendering.

/// A filename in the on-disk 8.3 form: 11 bytes, space padded, no dot,
/// uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShortName([u8; 11]);

impl ShortName {
    /// Render a `NAME.EXT` path into 8.3 form.
    ///
    /// Up to eight name characters are taken (a `.` ends the name early), a
    /// single separating `.` is consumed if present, then up to three
    /// extension characters. Everything is uppercased and space padded, so
    /// the conversion is idempotent on input that is already canonical.
    #[must_use]
    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)] // o < 11 and i < bytes.len() are the loop conditions
    pub fn from_path(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut out = [b' '; 11];
        let mut i = 0;

        let mut o = 0;
        while i < bytes.len() && o < 8 && bytes[i] != b'.' {
            out[o] = bytes[i].to_ascii_uppercase();
            i += 1;
            o += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
        }
        let mut o = 8;
        while i < bytes.len() && o < 11 && bytes[i] != b'.' {
            out[o] = bytes[i].to_ascii_uppercase();
            i += 1;
            o += 1;
        }

        Self(out)
    }

    /// The 11 on-disk bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }
}

impl core::fmt::Display for ShortName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &b in self.0.iter().take(8).filter(|&&b| b != b' ') {
            f.write_fmt(format_args!("{}", b as char))?;
        }
        if self.0[8] != b' ' {
            f.write_str(".")?;
            for &b in self.0[8..].iter().filter(|&&b| b != b' ') {
                f.write_fmt(format_args!("{}", b as char))?;
            }
        }
        Ok(())
    }
}
