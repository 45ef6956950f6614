//! Token 估算：上下文窗口按此计算每条历史记录的开销

/// 字符计数近似：ASCII 约 4 字符 / token，其他字符约 1.5 字符 / token，向上取整
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(text: &str) -> usize {
        let (ascii, wide) = text.chars().fold((0usize, 0usize), |(a, w), c| {
            if c.is_ascii() {
                (a + 1, w)
            } else {
                (a, w + 1)
            }
        });
        (ascii.div_ceil(4) + (wide * 2).div_ceil(3)).max(1)
    }
}
