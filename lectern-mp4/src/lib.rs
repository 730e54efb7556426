//! Just enough of an ISO-BMFF box reader to pull the default key id (KID) out of an
//! encrypted track.
//!
//! Encrypted fragmented mp4 files carry a `tenc` box inside the sample description of
//! their init segment. The box holds the 16 byte key id that names the content key
//! needed to decrypt the track:
//!
//! ```text
//! moov/trak/mdia/minf/stbl/stsd/{encv,enca}/sinf/schi/tenc
//! ```
//!
//! Use [`default_kid`] when the init segment is already in memory and
//! [`read_default_kid`] to scan a file on disk without loading media data.

mod error;
mod reader;
mod tenc;

pub use error::Error;
pub use reader::Reader;
pub use tenc::{default_kid, read_default_kid};

/// A `Result` alias where the `Err` case is `lectern_mp4::Error`.
pub type Result<T> = std::result::Result<T, Error>;
