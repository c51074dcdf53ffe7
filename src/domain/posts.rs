use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

/// Number of posts shown on every paginated listing.
pub const POSTS_PER_PAGE: usize = 10;

/// Number of characters of a post used as its title on the detail page.
pub const TITLE_PREVIEW_CHARS: usize = 30;

pub const HUMAN_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[day padding:none] [month repr:long] [year]");
pub const ISO_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Post and comment text must contain something other than whitespace.
pub fn has_content(text: &str) -> bool {
    !text.trim().to_lowercase().is_empty()
}

/// Leading characters of a post, used for page titles.
pub fn title_preview(text: &str) -> String {
    text.trim().chars().take(TITLE_PREVIEW_CHARS).collect()
}

pub fn format_human_date(when: OffsetDateTime) -> String {
    when.format(HUMAN_DATE_FORMAT)
        .unwrap_or_else(|_| when.date().to_string())
}

pub fn format_iso_date(when: OffsetDateTime) -> String {
    when.to_offset(time::UtcOffset::UTC)
        .format(ISO_DATE_FORMAT)
        .unwrap_or_else(|_| when.date().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn blank_text_has_no_content() {
        assert!(!has_content(""));
        assert!(!has_content("   \n\t"));
        assert!(has_content(" a "));
        assert!(has_content("ТЕКСТ"));
    }

    #[test]
    fn title_preview_truncates_by_characters() {
        let text = "тестовый текст, который длиннее тридцати символов";
        let preview = title_preview(text);
        assert_eq!(preview.chars().count(), TITLE_PREVIEW_CHARS);
        assert!(text.starts_with(&preview));
    }

    #[test]
    fn dates_format_for_humans_and_machines() {
        let when = datetime!(2022-03-07 10:15:00 UTC);
        assert_eq!(format_human_date(when), "7 March 2022");
        assert_eq!(format_iso_date(when), "2022-03-07T10:15:00Z");
    }
}
