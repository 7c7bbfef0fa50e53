//! 归档线格式：varint、流式读取、protobuf 消息与 header 编解码

pub mod header;
pub mod proto;
pub mod reader;
pub mod varint;
