use encoding_rs::{Encoding, IBM866, UTF_8, WINDOWS_1251};

/// Strict best-effort decoder: the first encoding that decodes the whole
/// input without replacement characters wins.
#[derive(Debug, Clone)]
pub(crate) struct EncodingDecoder {
    encodings: Vec<&'static Encoding>,
}

impl EncodingDecoder {
    pub(crate) fn new(encodings: Vec<&'static Encoding>) -> Self {
        Self { encodings }
    }

    /// Server logs are mostly UTF-8, older builds write cp1251.
    pub(crate) fn log() -> Self {
        Self::new(vec![UTF_8, WINDOWS_1251, IBM866])
    }

    /// Console tools on a Russian Windows host print in the OEM code page.
    pub(crate) fn command() -> Self {
        Self::new(vec![IBM866, WINDOWS_1251, UTF_8])
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return Some(String::new());
        }
        self.encodings.iter().find_map(|encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
        })
    }

    pub(crate) fn decode_lossy(&self, bytes: &[u8]) -> String {
        self.decode(bytes)
            .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_wins_for_log_order() {
        let decoder = EncodingDecoder::log();
        assert_eq!(decoder.decode("Сервер запущен".as_bytes()).unwrap(), "Сервер запущен");
    }

    #[test]
    fn test_cp1251_fallback() {
        let (bytes, _, _) = WINDOWS_1251.encode("Ошибка");
        let decoder = EncodingDecoder::log();
        assert_eq!(decoder.decode(&bytes).unwrap(), "Ошибка");
    }

    #[test]
    fn test_cp866_first_for_commands() {
        let (bytes, _, _) = IBM866.encode("СОСТОЯНИЕ");
        let decoder = EncodingDecoder::command();
        assert_eq!(decoder.decode(&bytes).unwrap(), "СОСТОЯНИЕ");
    }

    #[test]
    fn test_none_when_every_encoding_fails() {
        let decoder = EncodingDecoder::new(vec![UTF_8]);
        assert!(decoder.decode(&[0xff, 0xfe, 0xfd]).is_none());
        assert_eq!(decoder.decode(&[]).unwrap(), "");
    }
}
