pub struct BytesConvert {}
impl BytesConvert {
    /// 将任意 Copy 类型的 slice 视为字节
    ///
    /// 用于 vk 中没有实现 Pod 的结构体，例如 `vk::AccelerationStructureInstanceKHR`
    pub fn bytes_of_slice<T: Copy>(data: &[T]) -> &[u8] {
        unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, size_of_val(data)) }
    }

    /// 向上对齐，`align` 必须是 2 的幂
    #[inline]
    pub const fn align_up(value: u64, align: u64) -> u64 {
        (value + align - 1) & !(align - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(BytesConvert::align_up(0, 64), 0);
        assert_eq!(BytesConvert::align_up(1, 64), 64);
        assert_eq!(BytesConvert::align_up(64, 64), 64);
        assert_eq!(BytesConvert::align_up(65, 32), 96);
        assert_eq!(BytesConvert::align_up(7, 1), 7);
    }

    #[test]
    fn test_bytes_of_slice() {
        let data = [1u32, 2u32];
        let bytes = BytesConvert::bytes_of_slice(&data);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1u32.to_ne_bytes());
    }
}
