//! Output-language detection from the script of the topic text.

/// Returns `zh`, `ja`, `ko` or `en`.
///
/// The first CJK character decides, so a Japanese topic that opens with kana
/// stays Japanese even when kanji follow.
pub fn detect_language(text: &str) -> &'static str {
    text.chars()
        .find_map(|c| match c as u32 {
            0x4E00..=0x9FFF => Some("zh"),
            0x3040..=0x309F | 0x30A0..=0x30FF => Some("ja"),
            0xAC00..=0xD7AF => Some("ko"),
            _ => None,
        })
        .unwrap_or("en")
}
