use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::Command;
use tracing::warn;

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

pub(super) fn tesseract_version() -> Result<String> {
    let output = Command::new("tesseract")
        .arg("--version")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;
    if !output.status.success() {
        return Err(anyhow!("tesseract --version exited with {}", output.status));
    }
    // Older builds print the banner on stderr.
    let banner = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&banner)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Maps a two-letter language code to tesseract's traineddata name. Codes
/// tesseract already understands pass through.
pub fn tesseract_language(code: &str) -> String {
    let code = code.trim();
    let mapped = match code.to_ascii_lowercase().as_str() {
        "en" => "eng",
        "ar" => "ara",
        "ja" => "jpn",
        "zh" | "zh-cn" | "zh-hans" => "chi_sim",
        "zh-tw" | "zh-hant" => "chi_tra",
        "ko" => "kor",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "ru" => "rus",
        _ => return code.to_string(),
    };
    mapped.to_string()
}

pub(super) fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let wanted: Vec<String> = requested
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(tesseract_language)
        .collect();
    if wanted.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let available = match list_tesseract_languages() {
        Ok(list) => list,
        Err(_) => return Ok(wanted.join("+")),
    };

    let (chosen, missing): (Vec<String>, Vec<String>) = wanted
        .into_iter()
        .partition(|lang| available.iter().any(|value| value == lang));

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

pub(super) fn run_tesseract_tsv(path: &Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--psm")
        .arg(psm.to_string())
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
