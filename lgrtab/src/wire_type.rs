//! 线路数据类型目录
//!
//! 服务端列定义中的类型码。`Lsf` 后缀表示低字节在前，其余多字节类型为高字节在前。

use std::fmt;

/// 字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// 高字节在前
    Msf,
    /// 低字节在前
    Lsf,
}

impl ByteOrder {
    /// 主机字节序
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Lsf
        } else {
            ByteOrder::Msf
        }
    }

    /// 与主机字节序不同，需要交换
    pub fn needs_swap(self) -> bool {
        self != Self::native()
    }
}

/// 值族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Signed,
    Unsigned,
    Float,
    Boolean,
    Bits,
    Ascii,
    Stamp,
    Fs2,
}

/// 线路类型码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum WireType {
    UInt1 = 1,
    UInt2 = 2,
    UInt4 = 3,
    Int1 = 4,
    Int2 = 5,
    Int4 = 6,
    Fs2 = 7,
    Ieee4 = 9,
    Bool = 10,
    Ascii = 11,
    Sec = 12,
    USec = 13,
    NSec = 14,
    AsciiZ = 16,
    Bool8 = 17,
    Ieee8 = 18,
    Int2Lsf = 19,
    Int4Lsf = 20,
    UInt2Lsf = 21,
    UInt4Lsf = 22,
    NSecLsf = 23,
    Ieee4Lsf = 24,
    Ieee8Lsf = 25,
    Bool2 = 27,
    Bool4 = 28,
    Int8 = 32,
    Int8Lsf = 33,
    UInt8 = 34,
    UInt8Lsf = 35,
}

impl TryFrom<u32> for WireType {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        let ty = match code {
            1 => WireType::UInt1,
            2 => WireType::UInt2,
            3 => WireType::UInt4,
            4 => WireType::Int1,
            5 => WireType::Int2,
            6 => WireType::Int4,
            7 => WireType::Fs2,
            9 => WireType::Ieee4,
            10 => WireType::Bool,
            11 => WireType::Ascii,
            12 => WireType::Sec,
            13 => WireType::USec,
            14 => WireType::NSec,
            16 => WireType::AsciiZ,
            17 => WireType::Bool8,
            18 => WireType::Ieee8,
            19 => WireType::Int2Lsf,
            20 => WireType::Int4Lsf,
            21 => WireType::UInt2Lsf,
            22 => WireType::UInt4Lsf,
            23 => WireType::NSecLsf,
            24 => WireType::Ieee4Lsf,
            25 => WireType::Ieee8Lsf,
            27 => WireType::Bool2,
            28 => WireType::Bool4,
            32 => WireType::Int8,
            33 => WireType::Int8Lsf,
            34 => WireType::UInt8,
            35 => WireType::UInt8Lsf,
            other => return Err(other),
        };
        Ok(ty)
    }
}

impl WireType {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// 单个元素的存储宽度（字节）
    pub fn width(self) -> usize {
        use WireType::*;
        match self {
            UInt1 | Int1 | Bool | Bool8 | Ascii | AsciiZ => 1,
            UInt2 | Int2 | Int2Lsf | UInt2Lsf | Fs2 | Bool2 => 2,
            UInt4 | Int4 | Int4Lsf | UInt4Lsf | Ieee4 | Ieee4Lsf | Bool4 | Sec => 4,
            USec => 6,
            Int8 | Int8Lsf | UInt8 | UInt8Lsf | Ieee8 | Ieee8Lsf | NSec | NSecLsf => 8,
        }
    }

    pub fn family(self) -> Family {
        use WireType::*;
        match self {
            Int1 | Int2 | Int2Lsf | Int4 | Int4Lsf | Int8 | Int8Lsf => Family::Signed,
            UInt1 | UInt2 | UInt2Lsf | UInt4 | UInt4Lsf | UInt8 | UInt8Lsf => Family::Unsigned,
            Ieee4 | Ieee4Lsf | Ieee8 | Ieee8Lsf => Family::Float,
            Bool | Bool2 | Bool4 => Family::Boolean,
            Bool8 => Family::Bits,
            Ascii | AsciiZ => Family::Ascii,
            Sec | USec | NSec | NSecLsf => Family::Stamp,
            Fs2 => Family::Fs2,
        }
    }

    /// 线路字节序（单字节类型视为 LSF）
    pub fn byte_order(self) -> ByteOrder {
        use WireType::*;
        match self {
            Int2Lsf | Int4Lsf | Int8Lsf | UInt2Lsf | UInt4Lsf | UInt8Lsf | Ieee4Lsf
            | Ieee8Lsf | NSecLsf => ByteOrder::Lsf,
            UInt1 | Int1 | Bool | Bool8 | Ascii | AsciiZ => ByteOrder::Lsf,
            _ => ByteOrder::Msf,
        }
    }

    pub fn is_ascii(self) -> bool {
        self.family() == Family::Ascii
    }

    /// 线路格式与 TOB1 一致，可以直接整块复制
    pub fn is_tob1_native(self) -> bool {
        use WireType::*;
        match self {
            Fs2 => true,
            Sec | USec | Bool2 | Bool4 => false,
            _ => self.byte_order() == ByteOrder::Lsf,
        }
    }

    /// TOB1 头部中的数据类型名
    pub fn tob1_type_name(self) -> &'static str {
        use WireType::*;
        match self {
            UInt1 => "UINT1",
            Int1 => "INT1",
            UInt2 | UInt2Lsf => "UINT2",
            Int2 | Int2Lsf => "INT2",
            UInt4 | UInt4Lsf | Sec => "ULONG",
            Int4 | Int4Lsf => "LONG",
            UInt8 | UInt8Lsf => "UINT8",
            Int8 | Int8Lsf => "INT8",
            Fs2 => "FP2",
            Ieee4 | Ieee4Lsf => "IEEE4",
            Ieee8 | Ieee8Lsf => "IEEE8",
            Bool => "BOOL",
            Bool2 => "BOOL2",
            Bool4 => "BOOL4",
            Bool8 => "BOOL8",
            Ascii | AsciiZ => "ASCII",
            USec | NSec | NSecLsf => "NSec",
        }
    }

    /// TOB1 输出宽度
    pub fn tob1_width(self) -> usize {
        match self {
            WireType::USec => 8,
            other => other.width(),
        }
    }

    /// CSIXML/CSIJSON 字段类型名
    pub fn xml_type_name(self) -> &'static str {
        match self.family() {
            Family::Signed if self.width() == 8 => "xsd:long",
            Family::Signed => "xsd:int",
            Family::Unsigned if self.width() == 8 => "xsd:unsignedLong",
            Family::Unsigned => "xsd:unsignedInt",
            Family::Float | Family::Fs2 => "xsd:float",
            Family::Boolean => "xsd:boolean",
            Family::Bits | Family::Ascii => "xsd:string",
            Family::Stamp => "xsd:dateTime",
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 0..64u32 {
            if let Ok(ty) = WireType::try_from(code) {
                assert_eq!(ty.code(), code);
            }
        }
        assert_eq!(WireType::try_from(8), Err(8));
        assert_eq!(WireType::try_from(0), Err(0));
    }

    #[test]
    fn test_tob1_native() {
        assert!(WireType::Ieee4Lsf.is_tob1_native());
        assert!(!WireType::Ieee4.is_tob1_native());
        assert!(WireType::Fs2.is_tob1_native());
        assert!(WireType::Ascii.is_tob1_native());
        assert!(!WireType::USec.is_tob1_native());
        assert!(WireType::NSecLsf.is_tob1_native());
    }
}
