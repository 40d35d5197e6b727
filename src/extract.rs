//! Knowledge extraction: raw pasted text → [`ExtractedKnowledge`].
//!
//! Deterministic pattern matching, one family of regexes per target field.
//! The extractor is pure; committing a result is the caller's job (see
//! [`KnowledgeHub::commit_extracted`](crate::hub::KnowledgeHub::commit_extracted)).
//!
//! # Fields
//!
//! | Field | Source |
//! |-------|--------|
//! | `title` | content-type heuristic (subject, first error line, heading, first line) |
//! | `description` | body, truncated to `extraction.max_description_chars` |
//! | `affected_services` | `extraction.services` dictionary, whole-word, case-insensitive |
//! | `symptoms` | sentences with failure phrases; log lines at WARN/ERROR/FATAL |
//! | `error_messages` | exception signatures, stack frames, ERROR/FATAL lines |
//! | `severity` | keyword families, default `medium` |
//! | `tags` | matched services plus an explicitly detected severity |
//!
//! Confidence is the fraction of those seven fields that were populated.
//! A defaulted severity does not count.

use regex::Regex;

use crate::config::ExtractionConfig;
use crate::error::{HubError, HubResult};
use crate::models::{CaseType, ContentType, ExtractedKnowledge, Severity};

const MAX_ERROR_MESSAGES: usize = 20;
const MAX_SYMPTOMS: usize = 20;
const MAX_TITLE_CHARS: usize = 200;
const MAX_LINE_CHARS: usize = 300;
const LOG_DESCRIPTION_LINES: usize = 20;
const TARGET_FIELDS: f64 = 7.0;

pub struct KnowledgeExtractor {
    services: Vec<(String, Regex)>,
    email_header: Regex,
    case_title: Regex,
    heading: Regex,
    error_line: Regex,
    log_level: Regex,
    symptom: Regex,
    sentence_break: Regex,
    critical: Regex,
    high: Regex,
    medium: Regex,
    low: Regex,
    feature_request: Regex,
    question: Regex,
    max_description_chars: usize,
}

fn compile(pattern: &str) -> HubResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| HubError::validation(format!("invalid extraction pattern {}: {}", pattern, e)))
}

impl KnowledgeExtractor {
    pub fn new(config: &ExtractionConfig) -> HubResult<Self> {
        let mut services = Vec::new();
        for name in &config.services {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            let re = compile(&format!(r"(?i)\b{}\b", regex::escape(&name)))?;
            services.push((name, re));
        }

        Ok(Self {
            services,
            email_header: compile(
                r"(?i)^(from|to|cc|bcc|date|subject|reply-to|message-id|sent)\s*:\s*(.*)$",
            )?,
            case_title: compile(r"(?i)^\s*(title|subject|summary)\s*:\s*(.+)$")?,
            heading: compile(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$")?,
            error_line: compile(
                r"(\b[A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*)*(?:Exception|Error)\b|\bError:|Traceback \(most recent call last\)|panicked at|^\s*at\s+[\w$.<>/]+\(.*\)|\b(?:ERROR|FATAL)\b)",
            )?,
            log_level: compile(r"\b(WARN|WARNING|ERROR|FATAL)\b[\]:\s-]*(.*)$")?,
            symptom: compile(
                r"(?i)\b(fail(s|ed|ing|ure|ures)?|time[ds]?\s?out|timeouts?|errors?|crash(es|ed|ing)?|unavailable|unreachable|refused|slow|latency|hang(s|ing)?|stuck|out of memory|oom|exceptions?|5\d\d)\b",
            )?,
            sentence_break: compile(r"[.!?]+(?:\s+|$)|\n+")?,
            critical: compile(r"(?i)\b(critical|outage|down|sev\s?1|p1|data loss)\b")?,
            high: compile(r"(?i)\b(high|urgent|sev\s?2|p2|degraded)\b")?,
            medium: compile(r"(?i)\b(medium|moderate|sev\s?3|p3)\b")?,
            low: compile(r"(?i)\b(low|minor|cosmetic|p4)\b")?,
            feature_request: compile(
                r"(?i)(\bfeature request\b|\bwould like\b|\benhancement\b|\badd support\b|\bit would be (nice|great)\b)",
            )?,
            question: compile(r"(?i)(\bhow (do|can|should) (i|we)\b|\bhow to\b|\bis it possible\b)")?,
            max_description_chars: config.max_description_chars,
        })
    }

    /// Extract a structured candidate from `raw` content.
    pub fn extract(&self, raw: &str, content_type: ContentType) -> ExtractedKnowledge {
        let (subject, body) = match content_type {
            ContentType::Email => self.split_email(raw),
            _ => (None, raw.to_string()),
        };

        let title = match content_type {
            ContentType::Email => subject.or_else(|| first_line(&body)),
            ContentType::Log => self.first_error_line(&body).or_else(|| first_line(&body)),
            ContentType::Documentation => self.first_heading(&body).or_else(|| first_line(&body)),
            ContentType::Case => self.case_title(&body).or_else(|| first_line(&body)),
        }
        .map(|t| truncate_chars(&t, MAX_TITLE_CHARS))
        .filter(|t| !t.is_empty());

        // an email subject is no longer part of the body
        let scan = match &title {
            Some(t) => format!("{}\n{}", t, body),
            None => body.clone(),
        };

        let description = self.description(&body, content_type);
        let affected_services = self.services(&scan);
        let symptoms = match content_type {
            ContentType::Log => self.log_symptoms(&body),
            _ => self.sentence_symptoms(&body),
        };
        let error_messages = self.error_messages(&body);
        let explicit_severity = self.severity(&scan);

        let mut tags = affected_services.clone();
        if let Some(sev) = explicit_severity {
            tags.push(sev.as_str().to_string());
        }

        let suggested_case_type = self.case_type(&body, title.as_deref());

        let populated = [
            title.is_some(),
            description.is_some(),
            !affected_services.is_empty(),
            !symptoms.is_empty(),
            !error_messages.is_empty(),
            explicit_severity.is_some(),
            !tags.is_empty(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        let confidence = (populated as f64 / TARGET_FIELDS).clamp(0.0, 1.0);

        ExtractedKnowledge {
            title,
            description,
            affected_services,
            symptoms,
            error_messages,
            severity: Some(explicit_severity.unwrap_or(Severity::Medium)),
            tags,
            confidence,
            suggested_case_type,
        }
    }

    /// Strip the leading header block, returning the subject if one was present.
    fn split_email(&self, raw: &str) -> (Option<String>, String) {
        let mut subject = None;
        let mut lines = raw.lines().peekable();
        let mut saw_header = false;

        while let Some(&line) = lines.peek() {
            if let Some(caps) = self.email_header.captures(line) {
                saw_header = true;
                if caps[1].eq_ignore_ascii_case("subject") {
                    let s = caps[2].trim();
                    if !s.is_empty() {
                        subject = Some(s.to_string());
                    }
                }
                lines.next();
            } else if saw_header && line.trim().is_empty() {
                lines.next();
                break;
            } else {
                break;
            }
        }

        (subject, lines.collect::<Vec<_>>().join("\n"))
    }

    fn case_title(&self, body: &str) -> Option<String> {
        body.lines()
            .find_map(|l| self.case_title.captures(l).map(|c| c[2].trim().to_string()))
    }

    fn first_heading(&self, body: &str) -> Option<String> {
        body.lines()
            .find_map(|l| self.heading.captures(l).map(|c| c[1].trim().to_string()))
    }

    fn first_error_line(&self, body: &str) -> Option<String> {
        body.lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && self.error_line.is_match(l))
            .map(|l| l.to_string())
    }

    fn description(&self, body: &str, content_type: ContentType) -> Option<String> {
        let text = match content_type {
            ContentType::Log => body
                .lines()
                .filter(|l| !l.trim().is_empty())
                .take(LOG_DESCRIPTION_LINES)
                .collect::<Vec<_>>()
                .join("\n"),
            _ => body.trim().to_string(),
        };
        let text = truncate_chars(text.trim(), self.max_description_chars);
        (!text.is_empty()).then_some(text)
    }

    fn services(&self, body: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, re)| re.is_match(body))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn sentence_symptoms(&self, body: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sentence in self.sentence_break.split(body) {
            let sentence = sentence.trim();
            if sentence.is_empty()
                || self.email_header.is_match(sentence)
                || !self.symptom.is_match(sentence)
            {
                continue;
            }
            push_unique(&mut out, truncate_chars(sentence, MAX_LINE_CHARS), MAX_SYMPTOMS);
        }
        out
    }

    fn log_symptoms(&self, body: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for line in body.lines() {
            if let Some(caps) = self.log_level.captures(line) {
                let message = caps[2].trim();
                if !message.is_empty() {
                    push_unique(&mut out, truncate_chars(message, MAX_LINE_CHARS), MAX_SYMPTOMS);
                }
            }
        }
        out
    }

    fn error_messages(&self, body: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for line in body.lines() {
            let line = line.trim_end();
            if !line.trim().is_empty() && self.error_line.is_match(line) {
                push_unique(
                    &mut out,
                    truncate_chars(line.trim(), MAX_LINE_CHARS),
                    MAX_ERROR_MESSAGES,
                );
            }
        }
        out
    }

    /// Keyword-detected severity, most severe family first.
    fn severity(&self, text: &str) -> Option<Severity> {
        if self.critical.is_match(text) {
            Some(Severity::Critical)
        } else if self.high.is_match(text) {
            Some(Severity::High)
        } else if self.medium.is_match(text) {
            Some(Severity::Medium)
        } else if self.low.is_match(text) {
            Some(Severity::Low)
        } else {
            None
        }
    }

    fn case_type(&self, body: &str, title: Option<&str>) -> CaseType {
        if self.feature_request.is_match(body) {
            CaseType::FeatureRequest
        } else if self.question.is_match(body) || title.is_some_and(|t| t.contains('?')) {
            CaseType::Question
        } else {
            CaseType::Incident
        }
    }
}

fn first_line(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.to_string())
}

fn push_unique(out: &mut Vec<String>, item: String, cap: usize) {
    if out.len() < cap && !out.contains(&item) {
        out.push(item);
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
