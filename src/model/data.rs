use std::ops::{Deref, DerefMut};

use crate::error::{SshError, SshResult};

/// **byte**
/// byte 标识任意一个 8 位值（8 位字节）。
///
/// **boolean**
/// 一个布尔值作为一个字节存储。0 表示 FALSE，所有非零的值必须被解释为 TRUE。
///
/// **uint32**
/// 表示一个 32 位无符号整数。按重要性降序（网络字节顺序）储存为 4 个字节。
///
/// **string**
/// 任意长度二进制字符串，被储存为 1 个包含其长度的 uint32 以及后续的字节。
///
/// **mpint**
/// 表示二进制补码格式的多精度整数，存储为一个字符串，从高位到低位（MSB first）。
/// 对于正数，如果最高位将被置为 1，则必须在前面加一个值为 0 的字节。
/// 零必须被存储为具有 0 个字节的数据的字符串。
///
/// **name-list**
/// 一个包含逗号分隔的名称列表的字符串。
///
/// All the getters consume bytes from the front and fail with
/// [SshError::ProtocolViolation] when the buffer is shorter than the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Data(Vec<u8>);

impl Data {
    pub fn new() -> Data {
        Data(Vec::new())
    }

    // 无符号字节 8位
    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(v as u8)
    }

    // 32位无符号整型
    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.0.extend(v.to_be_bytes());
        self
    }

    // 字符串型数据
    // 需要计算字符串长度
    pub fn put_str(&mut self, str: &str) -> &mut Self {
        self.put_u8s(str.as_bytes())
    }

    // 字节数组
    // 需要计算数组长度
    pub fn put_u8s(&mut self, v: &[u8]) -> &mut Self {
        self.put_u32(v.len() as u32);
        self.0.extend(v);
        self
    }

    /// unsigned big-endian magnitude to mpint
    pub fn put_mpint(&mut self, v: &[u8]) -> &mut Self {
        let start = v.iter().position(|&b| b != 0).unwrap_or(v.len());
        let v = &v[start..];
        let mut result: Vec<u8> = Vec::with_capacity(v.len() + 1);
        // 0x80 = 128
        if !v.is_empty() && v[0] & 0x80 != 0 {
            result.push(0);
        }
        result.extend(v);
        self.put_u8s(&result)
    }

    fn take(&mut self, size: usize) -> SshResult<Vec<u8>> {
        if self.0.len() < size {
            return Err(SshError::ProtocolViolation(format!(
                "need {} bytes but only {} left",
                size,
                self.0.len()
            )));
        }
        Ok(self.0.drain(..size).collect())
    }

    // 跳过多少位数据
    pub fn skip(&mut self, size: usize) -> SshResult<()> {
        self.take(size).map(|_| ())
    }

    // 获取字节
    pub fn get_u8(&mut self) -> SshResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> SshResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    // 获取32位无符号整型
    pub fn get_u32(&mut self) -> SshResult<u32> {
        let u32_buf = self.take(4)?;
        let mut bytes = [0_u8; 4];
        bytes.copy_from_slice(&u32_buf);
        Ok(u32::from_be_bytes(bytes))
    }

    // 获取字节数组
    pub fn get_u8s(&mut self) -> SshResult<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub fn get_string(&mut self) -> SshResult<String> {
        crate::util::from_utf8(self.get_u8s()?)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Data {
    fn from(v: Vec<u8>) -> Self {
        Data(v)
    }
}

impl From<&[u8]> for Data {
    fn from(v: &[u8]) -> Self {
        Data(v.into())
    }
}

impl From<Data> for Vec<u8> {
    fn from(data: Data) -> Self {
        data.0
    }
}

impl Deref for Data {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
