//! 解码模块
//!
//! 字节源 → 解码器 → 设备原生格式的 PCM

pub mod data;
pub mod decoder;
pub mod raw;
pub mod source;

pub use data::AudioData;
pub use decoder::{
    open_decoder, open_decoder_or_invalid, DecodeError, InvalidDecoder, PcmDecoder,
    SymphoniaDecoder, RAW_EXTENSIONS, SUPPORTED_EXTENSIONS,
};
pub use raw::RawPcmDecoder;
pub use source::ByteSource;
