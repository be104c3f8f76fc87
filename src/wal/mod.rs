mod checkpoint;
mod codec;
mod log;

pub(crate) use checkpoint::CheckpointFile;
pub(crate) use codec::record_len;
pub(crate) use codec::RecordRead;
pub(crate) use log::WalCursor;
pub(crate) use log::WalWriter;
