//! Interactive helper to rename diarized speakers in transcript outputs.
//!
//! Reads the diarized `.txt` (and optionally the matching raw JSON), shows
//! the highest-confidence sample lines for each `SPEAKER_NN` label, prompts
//! for a replacement name, and writes `NAMED_`-prefixed copies of both files.

use console::style;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::transcribe::format_timestamp;
use crate::{DiarizerError, Result};

const PREVIEW_LIMIT: usize = 20;

fn speaker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bSPEAKER_\d{2}\b").unwrap())
}

fn cyrillic_to_latin(ch: char) -> Option<&'static str> {
    Some(match ch {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' | 'ь' => "",
        'ы' => "y",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    })
}

/// Turn a free-form name into an ASCII-friendly uppercase label:
/// Cyrillic transliterated, whitespace/punctuation collapsed to underscores.
pub fn transliterate_to_label(name: &str) -> String {
    let mut transliterated = String::new();
    for ch in name.chars() {
        let lower = ch.to_lowercase().next().unwrap_or(ch);
        match cyrillic_to_latin(lower) {
            Some(mapped) => transliterated.push_str(mapped),
            None => transliterated.push(ch),
        }
    }

    let mut label = String::new();
    let mut pending_separator = false;
    for ch in transliterated.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_separator && !label.is_empty() {
                label.push('_');
            }
            pending_separator = false;
            label.push(ch);
        } else {
            pending_separator = true;
        }
    }

    label.to_uppercase()
}

/// Group transcript lines by the speaker labels they mention, preserving the
/// order of first appearance.
fn collect_speaker_lines(lines: &[&str]) -> (HashMap<String, Vec<String>>, Vec<String>) {
    let mut speaker_lines: HashMap<String, Vec<String>> = HashMap::new();
    let mut ordered = Vec::new();

    for line in lines {
        for found in speaker_re().find_iter(line) {
            let speaker = found.as_str().to_string();
            speaker_lines
                .entry(speaker.clone())
                .or_default()
                .push((*line).to_string());
            if !ordered.contains(&speaker) {
                ordered.push(speaker);
            }
        }
    }

    (speaker_lines, ordered)
}

#[derive(Debug, Clone)]
struct ScoredSegment {
    start: Option<f64>,
    end: Option<f64>,
    text: String,
    score: f64,
}

fn safe_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(number) = value.as_f64() {
        return Some(number);
    }
    value.as_str().and_then(|s| s.parse().ok())
}

/// Extract a diarization/ASR confidence score for the given speaker.
///
/// Priority: segment-level speaker probability, generic segment
/// score/confidence, mean word-level score, exp(avg_logprob),
/// 1 - no_speech_prob, segment duration, 0.
fn extract_speaker_score(segment: &Value, speaker: &str) -> f64 {
    if let Some(prob) = safe_f64(segment.get("speaker_prob")) {
        return prob;
    }

    if let Some(probs) = segment.get("speaker_probs").and_then(Value::as_object) {
        if let Some(prob) = safe_f64(probs.get(speaker)) {
            return prob;
        }
    }

    for key in ["score", "confidence"] {
        if let Some(prob) = safe_f64(segment.get(key)) {
            return prob;
        }
    }

    if let Some(words) = segment.get("words").and_then(Value::as_array) {
        let mut scores = Vec::new();
        for word in words {
            if let Some(word_speaker) = word.get("speaker").and_then(Value::as_str) {
                if word_speaker != speaker {
                    continue;
                }
            }
            for key in ["speaker_prob", "prob", "probability", "score", "confidence"] {
                if let Some(score) = safe_f64(word.get(key)) {
                    scores.push(score);
                    break;
                }
            }
        }
        if !scores.is_empty() {
            return scores.iter().sum::<f64>() / scores.len() as f64;
        }
    }

    if let Some(avg_logprob) = safe_f64(segment.get("avg_logprob")) {
        return avg_logprob.exp().clamp(0.0, 1.0);
    }

    if let Some(no_speech_prob) = safe_f64(segment.get("no_speech_prob")) {
        return (1.0 - no_speech_prob).clamp(0.0, 1.0);
    }

    if let (Some(start), Some(end)) = (
        safe_f64(segment.get("start")),
        safe_f64(segment.get("end")),
    ) {
        let duration = end - start;
        if duration > 0.0 {
            return duration;
        }
    }

    0.0
}

/// Group JSON segments by speaker, adding scores for preview ranking.
fn collect_scored_segments(data: &Value) -> HashMap<String, Vec<ScoredSegment>> {
    let mut scored: HashMap<String, Vec<ScoredSegment>> = HashMap::new();

    let Some(segments) = data.get("segments").and_then(Value::as_array) else {
        return scored;
    };

    for segment in segments {
        let Some(speaker) = segment.get("speaker").and_then(Value::as_str) else {
            continue;
        };

        scored.entry(speaker.to_string()).or_default().push(ScoredSegment {
            start: safe_f64(segment.get("start")),
            end: safe_f64(segment.get("end")),
            text: segment
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string(),
            score: extract_speaker_score(segment, speaker),
        });
    }

    scored
}

/// Preview lines for a speaker: the top segments by score, reordered
/// chronologically for readability; transcript lines when no scores exist.
fn build_preview_lines(
    speaker: &str,
    text_lines: &[String],
    scored_segments: &[ScoredSegment],
    limit: usize,
) -> Vec<String> {
    if !scored_segments.is_empty() {
        let mut top: Vec<&ScoredSegment> = scored_segments.iter().collect();
        top.sort_by(|a, b| b.score.total_cmp(&a.score));
        top.truncate(limit);
        top.sort_by(|a, b| a.start.unwrap_or(0.0).total_cmp(&b.start.unwrap_or(0.0)));

        return top
            .iter()
            .map(|seg| {
                format!(
                    "[{} --> {}] {speaker}: {} (score={:.3})",
                    format_timestamp(seg.start),
                    format_timestamp(seg.end),
                    seg.text,
                    seg.score
                )
            })
            .collect();
    }

    text_lines.iter().take(limit).cloned().collect()
}

fn prompt_for_name<R: BufRead>(speaker: &str, input: &mut R) -> Result<String> {
    loop {
        println!(
            "Enter a name for {} (leave empty to keep the label):",
            style(speaker).cyan().bold()
        );

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(speaker.to_string());
        }
        let name = line.trim();
        if name.is_empty() {
            return Ok(speaker.to_string());
        }

        let candidate = transliterate_to_label(name);
        if candidate.is_empty() {
            println!("That name has no usable characters; try again.");
            continue;
        }

        println!(
            "Renaming {speaker} -> {}. Accept? [y/e]",
            style(&candidate).green()
        );
        loop {
            let mut answer = String::new();
            if input.read_line(&mut answer)? == 0 {
                return Ok(candidate);
            }
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" | "" => return Ok(candidate),
                "e" | "edit" => break,
                _ => println!("Please enter either 'y' or 'e'."),
            }
        }
    }
}

fn replace_speakers_in_text(text: &str, mapping: &HashMap<String, String>) -> String {
    speaker_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let label = &caps[0];
            mapping.get(label).cloned().unwrap_or_else(|| label.to_string())
        })
        .into_owned()
}

/// Substitute speaker labels in the raw JSON without disturbing any other
/// fields.
fn replace_speakers_in_json(data: &mut Value, mapping: &HashMap<String, String>) {
    let Some(segments) = data.get_mut("segments").and_then(Value::as_array_mut) else {
        return;
    };

    for segment in segments {
        let Some(speaker) = segment.get("speaker").and_then(Value::as_str) else {
            continue;
        };
        if let Some(renamed) = mapping.get(speaker) {
            segment["speaker"] = Value::String(renamed.clone());
        }
    }
}

fn named_path(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("NAMED_{filename}"))
}

/// Run the interactive rename flow against stdin.
pub fn run(transcript: &Path, json: Option<&Path>) -> Result<()> {
    let stdin = std::io::stdin();
    run_with_input(transcript, json, &mut stdin.lock())
}

fn run_with_input<R: BufRead>(transcript: &Path, json: Option<&Path>, input: &mut R) -> Result<()> {
    if !transcript.is_file() {
        return Err(DiarizerError::Input(format!(
            "Unable to find transcript file: {}",
            transcript.display()
        ))
        .into());
    }

    // Infer the matching JSON by extension swap when not given explicitly.
    let json_path = json
        .map(Path::to_path_buf)
        .or_else(|| {
            let candidate = transcript.with_extension("json");
            candidate.is_file().then_some(candidate)
        })
        .filter(|path| path.is_file());

    let text_content = fs_err::read_to_string(transcript)?;
    let lines: Vec<&str> = text_content.lines().collect();

    let (speaker_lines, speaker_order) = collect_speaker_lines(&lines);
    if speaker_order.is_empty() {
        println!("No SPEAKER_NN labels were found in the provided file.");
        return Ok(());
    }

    let json_data: Option<Value> = match &json_path {
        Some(path) => Some(serde_json::from_str(&fs_err::read_to_string(path)?)?),
        None => None,
    };
    let scored_segments = json_data
        .as_ref()
        .map(collect_scored_segments)
        .unwrap_or_default();

    let mut mapping = HashMap::new();
    for speaker in &speaker_order {
        let scored = scored_segments
            .get(speaker)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let empty = Vec::new();
        let text_lines = speaker_lines.get(speaker).unwrap_or(&empty);
        let preview = build_preview_lines(speaker, text_lines, scored, PREVIEW_LIMIT);

        let has_scores = scored.iter().any(|seg| seg.score != 0.0);
        if has_scores {
            println!(
                "\nExamples for {} (top {} by score):",
                style(speaker).bold(),
                preview.len().min(PREVIEW_LIMIT)
            );
        } else {
            println!(
                "\nExamples for {} (up to {PREVIEW_LIMIT} lines):",
                style(speaker).bold()
            );
        }

        if preview.is_empty() {
            println!("No examples found for this speaker.");
        }
        for example in &preview {
            println!("{example}");
        }

        mapping.insert(speaker.clone(), prompt_for_name(speaker, input)?);
    }

    println!("\nAll speakers processed. Creating named files...");

    let named_text_path = named_path(transcript);
    fs_err::write(&named_text_path, replace_speakers_in_text(&text_content, &mapping))?;
    println!("Created file: {}", named_text_path.display());

    match (json_path, json_data) {
        (Some(path), Some(mut data)) => {
            replace_speakers_in_json(&mut data, &mapping);
            let named_json_path = named_path(&path);
            fs_err::write(&named_json_path, serde_json::to_string_pretty(&data)?)?;
            println!("Created file: {}", named_json_path.display());
        }
        _ => println!("JSON file not found; skipping JSON copy."),
    }

    println!("Done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transliterates_cyrillic_names() {
        assert_eq!(transliterate_to_label("Пётр"), "PETR");
        assert_eq!(transliterate_to_label("Женя"), "ZHENYA");
    }

    #[test]
    fn collapses_whitespace_and_punctuation_to_underscores() {
        assert_eq!(transliterate_to_label("Anna-Maria O'Neil"), "ANNA_MARIA_O_NEIL");
        assert_eq!(transliterate_to_label("  spaced  out  "), "SPACED_OUT");
        assert_eq!(transliterate_to_label("!!!"), "");
    }

    #[test]
    fn collects_speakers_in_order_of_first_appearance() {
        let lines = vec![
            "[00:00:00.000 --> 00:00:01.000] SPEAKER_01: hi",
            "[00:00:01.000 --> 00:00:02.000] SPEAKER_00: hello",
            "[00:00:02.000 --> 00:00:03.000] SPEAKER_01: again",
        ];
        let (speaker_lines, order) = collect_speaker_lines(&lines);

        assert_eq!(order, vec!["SPEAKER_01", "SPEAKER_00"]);
        assert_eq!(speaker_lines["SPEAKER_01"].len(), 2);
    }

    #[test]
    fn segment_speaker_prob_wins_over_everything() {
        let seg = json!({"speaker_prob": 0.9, "avg_logprob": -5.0, "start": 0.0, "end": 100.0});
        assert_eq!(extract_speaker_score(&seg, "SPEAKER_00"), 0.9);
    }

    #[test]
    fn speaker_probs_map_is_consulted_per_speaker() {
        let seg = json!({"speaker_probs": {"SPEAKER_00": 0.7, "SPEAKER_01": 0.2}});
        assert_eq!(extract_speaker_score(&seg, "SPEAKER_01"), 0.2);
    }

    #[test]
    fn word_level_scores_are_averaged() {
        let seg = json!({
            "words": [
                {"word": "a", "score": 0.4},
                {"word": "b", "score": 0.8},
                {"word": "c", "speaker": "SPEAKER_99", "score": 0.0}
            ]
        });
        let score = extract_speaker_score(&seg, "SPEAKER_00");
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn avg_logprob_is_mapped_through_exp() {
        let seg = json!({"avg_logprob": -0.5});
        let score = extract_speaker_score(&seg, "SPEAKER_00");
        assert!((score - (-0.5f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn duration_is_the_last_resort_score() {
        let seg = json!({"start": 1.0, "end": 4.5});
        assert_eq!(extract_speaker_score(&seg, "SPEAKER_00"), 3.5);
        assert_eq!(extract_speaker_score(&json!({}), "SPEAKER_00"), 0.0);
    }

    #[test]
    fn previews_rank_by_score_then_reorder_chronologically() {
        let scored = vec![
            ScoredSegment { start: Some(10.0), end: Some(11.0), text: "late, high".into(), score: 0.9 },
            ScoredSegment { start: Some(1.0), end: Some(2.0), text: "early, mid".into(), score: 0.5 },
            ScoredSegment { start: Some(5.0), end: Some(6.0), text: "mid, low".into(), score: 0.1 },
        ];

        let preview = build_preview_lines("SPEAKER_00", &[], &scored, 2);
        assert_eq!(preview.len(), 2);
        assert!(preview[0].contains("early, mid"));
        assert!(preview[1].contains("late, high"));
        assert!(preview[1].contains("(score=0.900)"));
    }

    #[test]
    fn previews_fall_back_to_transcript_lines() {
        let text_lines = vec!["line a".to_string(), "line b".to_string()];
        let preview = build_preview_lines("SPEAKER_00", &text_lines, &[], 1);
        assert_eq!(preview, vec!["line a"]);
    }

    #[test]
    fn replaces_labels_in_text_leaving_unmapped_ones() {
        let mut mapping = HashMap::new();
        mapping.insert("SPEAKER_00".to_string(), "ALICE".to_string());

        let text = "SPEAKER_00: hi\nSPEAKER_01: hello\nSPEAKER_00: bye";
        let replaced = replace_speakers_in_text(text, &mapping);
        assert_eq!(replaced, "ALICE: hi\nSPEAKER_01: hello\nALICE: bye");
    }

    #[test]
    fn replaces_labels_in_json_without_touching_other_fields() {
        let mut data = json!({
            "language": "en",
            "segments": [
                {"speaker": "SPEAKER_00", "text": "hi", "avg_logprob": -0.3},
                {"text": "no speaker"}
            ]
        });
        let mut mapping = HashMap::new();
        mapping.insert("SPEAKER_00".to_string(), "BOB".to_string());

        replace_speakers_in_json(&mut data, &mapping);
        assert_eq!(data["segments"][0]["speaker"], "BOB");
        assert_eq!(data["segments"][0]["avg_logprob"], json!(-0.3));
        assert_eq!(data["language"], "en");
    }

    #[test]
    fn named_path_prefixes_the_filename() {
        let path = Path::new("/tmp/out/diarized_transcript_x.txt");
        assert_eq!(
            named_path(path),
            Path::new("/tmp/out/NAMED_diarized_transcript_x.txt")
        );
    }

    #[test]
    fn rename_flow_writes_named_copies() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("diarized_transcript_t.txt");
        let json_file = dir.path().join("diarized_transcript_t.json");
        fs_err::write(
            &txt,
            "[00:00:00.000 --> 00:00:01.000] SPEAKER_00: hello\n",
        )
        .unwrap();
        fs_err::write(
            &json_file,
            r#"{"segments": [{"speaker": "SPEAKER_00", "text": "hello", "start": 0.0, "end": 1.0}]}"#,
        )
        .unwrap();

        let mut input = std::io::Cursor::new("Alice\ny\n");
        run_with_input(&txt, None, &mut input).unwrap();

        let named_txt = fs_err::read_to_string(dir.path().join("NAMED_diarized_transcript_t.txt")).unwrap();
        assert!(named_txt.contains("ALICE: hello"));

        let named_json: Value = serde_json::from_str(
            &fs_err::read_to_string(dir.path().join("NAMED_diarized_transcript_t.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(named_json["segments"][0]["speaker"], "ALICE");
    }

    #[test]
    fn empty_input_keeps_the_original_label() {
        let mut input = std::io::Cursor::new("\n");
        let name = prompt_for_name("SPEAKER_03", &mut input).unwrap();
        assert_eq!(name, "SPEAKER_03");
    }

    #[test]
    fn edit_answer_restarts_the_prompt() {
        let mut input = std::io::Cursor::new("Bob\ne\nRobert\ny\n");
        let name = prompt_for_name("SPEAKER_00", &mut input).unwrap();
        assert_eq!(name, "ROBERT");
    }
}
