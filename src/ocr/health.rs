use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::ocr::error::OcrError;

/// Most languages a single `eng+spa`-style combination may name.
pub const MAX_LANGUAGE_COMBINATION: usize = 4;

/// Probes the local tesseract installation.
#[derive(Debug, Clone, Default)]
pub struct OcrHealthChecker {
    tessdata_path: Option<PathBuf>,
}

impl OcrHealthChecker {
    pub fn new(tessdata_path: Option<PathBuf>) -> Self {
        Self { tessdata_path }
    }

    fn tesseract_command(&self) -> Command {
        let mut command = Command::new("tesseract");
        if let Some(path) = &self.tessdata_path {
            command.arg("--tessdata-dir").arg(path);
        }
        command
    }

    pub fn check_tesseract_installation(&self) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg("--version")
            .output()
            .map_err(|_| OcrError::TesseractNotInstalled)?;

        if !output.status.success() {
            return Err(OcrError::TesseractNotInstalled);
        }

        let version_info = String::from_utf8_lossy(&output.stdout);
        let version = version_info
            .lines()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(version)
    }

    pub fn get_available_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = self
            .tesseract_command()
            .arg("--list-langs")
            .output()
            .map_err(|_| OcrError::TesseractNotInstalled)?;

        if !output.status.success() {
            return Err(OcrError::TesseractNotInstalled);
        }

        let languages = parse_language_list(&String::from_utf8_lossy(&output.stdout));
        debug!("Tesseract reports {} installed languages", languages.len());
        Ok(languages)
    }

    pub fn check_language_data(&self, lang: &str) -> Result<(), OcrError> {
        validate_language_combination(&self.get_available_languages()?, lang)
    }
}

/// Parse `tesseract --list-langs` output. The first line is a header.
pub fn parse_language_list(output: &str) -> Vec<String> {
    let mut languages: Vec<String> = output
        .lines()
        .skip(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "osd")
        .collect();

    languages.sort();
    languages.dedup();
    languages
}

/// Validate a single language or a `+`-joined combination against the installed set.
pub fn validate_language_combination(available: &[String], lang_combination: &str) -> Result<(), OcrError> {
    if lang_combination.trim().is_empty() {
        return Err(OcrError::LanguageDataNotFound {
            lang: "empty".to_string(),
        });
    }

    let languages: Vec<&str> = lang_combination.split('+').map(str::trim).collect();
    if languages.len() > MAX_LANGUAGE_COMBINATION {
        return Err(OcrError::LanguageDataNotFound {
            lang: format!(
                "Too many languages in combination: {}. Maximum is {}.",
                languages.len(),
                MAX_LANGUAGE_COMBINATION
            ),
        });
    }

    for lang in languages {
        if !available.iter().any(|a| a == lang) {
            return Err(OcrError::LanguageDataNotFound {
                lang: lang.to_string(),
            });
        }
    }

    Ok(())
}

pub fn get_language_display_name(lang_code: &str) -> String {
    match lang_code {
        "eng" => "English",
        "spa" => "Spanish",
        "fra" => "French",
        "deu" => "German",
        "ita" => "Italian",
        "por" => "Portuguese",
        "rus" => "Russian",
        "chi_sim" => "Chinese (Simplified)",
        "chi_tra" => "Chinese (Traditional)",
        "jpn" => "Japanese",
        "kor" => "Korean",
        "ara" => "Arabic",
        "hin" => "Hindi",
        "nld" => "Dutch",
        "swe" => "Swedish",
        "pol" => "Polish",
        "tur" => "Turkish",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed() -> Vec<String> {
        parse_language_list("List of available languages in \"/usr/share/tessdata/\" (4):\neng\nosd\nspa\ndeu\n")
    }

    #[test]
    fn test_parse_language_list_skips_header_and_osd() {
        assert_eq!(installed(), vec!["deu", "eng", "spa"]);
    }

    #[test]
    fn test_validate_single_and_combined_languages() {
        let available = installed();
        assert!(validate_language_combination(&available, "eng").is_ok());
        assert!(validate_language_combination(&available, "eng+spa").is_ok());

        let err = validate_language_combination(&available, "eng+jpn").unwrap_err();
        assert!(matches!(err, OcrError::LanguageDataNotFound { ref lang } if lang == "jpn"));
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized_combinations() {
        let available = installed();
        assert!(validate_language_combination(&available, "  ").is_err());
        assert!(validate_language_combination(&available, "eng+spa+deu+eng+spa").is_err());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(get_language_display_name("deu"), "German");
        assert_eq!(get_language_display_name("xyz"), "xyz");
    }
}
