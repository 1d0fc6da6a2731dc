use super::model::{Status, StatusIndicator};

/// Lower-cased views of an indicator, computed once per classification.
struct Signals {
    class: String,
    text: String,
    icon: Option<String>,
    markup: String,
}

impl Signals {
    fn from_parts(text: &str, class_attr: &str, icon_class: Option<&str>, markup: &str) -> Self {
        Signals {
            class: class_attr.to_lowercase(),
            text: normalize_text(text),
            icon: icon_class.map(str::to_lowercase),
            markup: markup.to_lowercase(),
        }
    }

    fn icon_tokens(&self) -> impl Iterator<Item = &str> {
        self.icon.iter().flat_map(|c| c.split_whitespace())
    }
}

type Rule = (&'static str, fn(&Signals) -> bool, Status);

// Order is precedence: class, then text, then icon, then raw markup.
static RULES: &[Rule] = &[
    ("class:offline", class_offline, Status::Offline),
    ("class:online", class_online, Status::Online),
    ("class:checking", class_checking, Status::Checking),
    ("text:offline", text_offline, Status::Offline),
    ("text:checking", text_checking, Status::Checking),
    ("text:online", text_online, Status::Online),
    ("icon:offline", icon_offline, Status::Offline),
    ("icon:online", icon_online, Status::Online),
    ("icon:checking", icon_checking, Status::Checking),
    ("markup:offline", markup_offline, Status::Offline),
    ("markup:online", markup_online, Status::Online),
    ("markup:checking", markup_checking, Status::Checking),
];

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn class_offline(s: &Signals) -> bool {
    s.class.contains("offline")
}

fn class_online(s: &Signals) -> bool {
    s.class.contains("online")
}

fn class_checking(s: &Signals) -> bool {
    s.class.contains("checking") || s.class.contains("verificando")
}

fn text_offline(s: &Signals) -> bool {
    s.text.contains("offline") || s.text.contains("off-line")
}

fn text_checking(s: &Signals) -> bool {
    s.text.contains("verificando") || s.text.contains("não verificado")
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

fn text_online(s: &Signals) -> bool {
    s.text.contains("online") || s.text.contains("on-line") || has_word(&s.text, "ok")
}

fn icon_offline(s: &Signals) -> bool {
    s.icon_tokens().any(|t| t.starts_with("fa-times"))
}

fn icon_online(s: &Signals) -> bool {
    s.icon_tokens().any(|t| t.starts_with("fa-check"))
}

fn icon_checking(s: &Signals) -> bool {
    s.icon_tokens()
        .any(|t| t == "fa-sync-alt" || t == "fa-spinner" || t.contains("spin"))
}

fn markup_offline(s: &Signals) -> bool {
    s.markup.contains("offline") || s.markup.contains("off-line")
}

fn markup_online(s: &Signals) -> bool {
    s.markup.contains("online") || s.markup.contains("on-line") || has_word(&s.markup, "ok")
}

fn markup_checking(s: &Signals) -> bool {
    s.markup.contains("checking")
        || s.markup.contains("verificando")
        || s.markup.contains("não verificado")
}

/// Returns the name of the first matching rule together with its status.
pub fn matching_rule(
    text: &str,
    class_attr: &str,
    icon_class: Option<&str>,
    markup: &str,
) -> Option<(&'static str, Status)> {
    let signals = Signals::from_parts(text, class_attr, icon_class, markup);
    RULES
        .iter()
        .find(|(_, matches, _)| matches(&signals))
        .map(|(name, _, status)| (*name, *status))
}

pub fn classify(text: &str, class_attr: &str, icon_class: Option<&str>, markup: &str) -> Status {
    matching_rule(text, class_attr, icon_class, markup)
        .map(|(_, status)| status)
        .unwrap_or(Status::Unknown)
}

pub fn classify_indicator(indicator: &StatusIndicator) -> Status {
    classify(
        &indicator.text,
        &indicator.class_attr,
        indicator.nested_icon.as_deref().map(|i| i.class_attr.as_str()),
        &indicator.outer_markup,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_offline_wins_over_everything() {
        let status = classify(
            "Online",
            "status offline",
            Some("fa fa-check-circle"),
            "<span class=\"status offline\">Online</span>",
        );
        assert_eq!(status, Status::Offline);
    }

    #[test]
    fn class_keywords() {
        assert_eq!(classify("", "status online", None, ""), Status::Online);
        assert_eq!(classify("", "status checking", None, ""), Status::Checking);
        assert_eq!(classify("", "STATUS VERIFICANDO", None, ""), Status::Checking);
    }

    #[test]
    fn text_is_normalized_before_matching() {
        assert_eq!(classify("  \n OFF-LINE \t", "status", None, ""), Status::Offline);
        assert_eq!(classify("Não   Verificado", "status", None, ""), Status::Checking);
        assert_eq!(classify(" On-Line ", "status", None, ""), Status::Online);
        assert_eq!(classify("OK", "status", None, ""), Status::Online);
    }

    #[test]
    fn text_ok_needs_whole_word() {
        assert_eq!(classify("book", "status", None, ""), Status::Unknown);
        assert_eq!(classify("ok!", "status", None, ""), Status::Online);
    }

    #[test]
    fn text_checking_beats_text_online() {
        // "verificando" is evaluated before the online keywords
        assert_eq!(classify("verificando online", "", None, ""), Status::Checking);
        assert_eq!(classify("offline verificando", "", None, ""), Status::Offline);
    }

    #[test]
    fn icon_used_when_text_and_class_silent() {
        assert_eq!(classify("", "status", Some("fas fa-times-circle"), ""), Status::Offline);
        assert_eq!(classify("", "status", Some("fas fa-check"), ""), Status::Online);
        assert_eq!(classify("", "status", Some("fas fa-sync-alt"), ""), Status::Checking);
        assert_eq!(classify("", "status", Some("fa fa-spinner"), ""), Status::Checking);
        assert_eq!(classify("", "status", Some("fa fa-circle-notch fa-spin"), ""), Status::Checking);
    }

    #[test]
    fn markup_fallback_keeps_precedence() {
        let markup = "<span data-state=\"online\" data-prev=\"offline\"></span>";
        assert_eq!(classify("", "status", None, markup), Status::Offline);
        assert_eq!(
            classify("", "status", None, "<span data-state=\"verificando\"></span>"),
            Status::Checking
        );
        assert_eq!(
            classify("", "status", Some("fa fa-circle"), "<span title=\"online\"></span>"),
            Status::Online
        );
    }

    #[test]
    fn markup_ok_needs_whole_word() {
        assert_eq!(classify("", "status", None, "<b>OK</b>"), Status::Online);
        assert_eq!(classify("", "status", None, "<b>book</b>"), Status::Unknown);
        assert_eq!(
            classify("", "status", None, "<span title=\"offline\">ok</span>"),
            Status::Offline
        );
    }

    #[test]
    fn unknown_when_nothing_matches() {
        assert_eq!(
            classify("—", "status badge", Some("fa fa-circle"), "<span class=\"status badge\">—</span>"),
            Status::Unknown
        );
        assert_eq!(classify("", "", None, ""), Status::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let inputs = [
            ("Online", "status", Some("fa fa-times"), "<span>Online</span>"),
            ("", "", Some("fa fa-spinner"), ""),
            ("whatever", "x", None, "<b>off-line</b>"),
        ];
        for (text, class, icon, markup) in inputs {
            let first = classify(text, class, icon, markup);
            for _ in 0..10 {
                assert_eq!(classify(text, class, icon, markup), first);
            }
        }
    }

    #[test]
    fn matching_rule_reports_the_first_hit() {
        assert_eq!(
            matching_rule("offline", "status online", None, ""),
            Some(("class:online", Status::Online))
        );
        assert_eq!(matching_rule("", "", None, ""), None);
    }

    #[test]
    fn indicator_uses_nested_icon_class() {
        let indicator = StatusIndicator {
            text: String::new(),
            class_attr: "status".into(),
            outer_markup: "<span class=\"status\"><i class=\"fa fa-times\"></i></span>".into(),
            nested_icon: Some(Box::new(StatusIndicator {
                class_attr: "fa fa-times".into(),
                ..Default::default()
            })),
        };
        assert_eq!(classify_indicator(&indicator), Status::Offline);
    }
}
