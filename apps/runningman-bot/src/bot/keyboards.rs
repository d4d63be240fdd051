use anyhow::Context;
use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use uuid::Uuid;

use crate::bot::callback_data::CallbackData;

pub const YEARS_PER_ROW: usize = 3;
pub const EPISODES_PER_ROW: usize = 5;

fn button(text: impl Into<String>, data: CallbackData) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, data.to_string())
}

/// Lays buttons out `per_row` at a time, keeping a short last row.
fn grid(buttons: Vec<InlineKeyboardButton>, per_row: usize) -> Vec<Vec<InlineKeyboardButton>> {
    buttons
        .chunks(per_row)
        .map(|row| row.to_vec())
        .collect()
}

pub fn years_keyboard(years: &[i32]) -> InlineKeyboardMarkup {
    let buttons = years
        .iter()
        .map(|&year| button(year.to_string(), CallbackData::VideoList { year }))
        .collect();
    InlineKeyboardMarkup::new(grid(buttons, YEARS_PER_ROW))
}

pub fn episodes_keyboard(year: i32, episodes: &[i32]) -> InlineKeyboardMarkup {
    let buttons = episodes
        .iter()
        .map(|&episode| button(episode.to_string(), CallbackData::VideoItem { year, episode }))
        .collect();
    let mut rows = grid(buttons, EPISODES_PER_ROW);
    rows.push(vec![button("⬅️ Back", CallbackData::Libraries)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn collection_keyboard(episodes: &[i32]) -> InlineKeyboardMarkup {
    let buttons = episodes
        .iter()
        .map(|&episode| button(episode.to_string(), CallbackData::VideoCollectionItem { episode }))
        .collect();
    InlineKeyboardMarkup::new(grid(buttons, EPISODES_PER_ROW))
}

pub fn video_item_keyboard(year: i32, episode: i32, has_access: bool) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if has_access {
        rows.push(vec![button("▶️ Watch", CallbackData::VideoLink { episode })]);
    } else {
        rows.push(vec![button("🛒 Buy episode", CallbackData::Invoice { year, episode })]);
        rows.push(vec![button("⭐ Subscribe for all episodes", CallbackData::SubscriptionInvoice)]);
    }
    rows.push(vec![button("⬅️ Back", CallbackData::VideoList { year })]);
    InlineKeyboardMarkup::new(rows)
}

pub fn collection_item_keyboard(episode: i32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("✅ Yes", CallbackData::VideoLink { episode }),
        button("❌ No", CallbackData::VideoCollection),
    ]])
}

pub fn process_payment_keyboard(invoice_id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        "💳 Process payment",
        CallbackData::InvoiceProcessor { invoice_id },
    )]])
}

pub fn url_keyboard(text: &str, url: Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(text, url)]])
}

pub fn support_url(number: &str) -> anyhow::Result<Url> {
    Url::parse(&format!("https://wa.me/{}", number.trim_start_matches('+')))
        .context("SUPPORT_NUMBER does not form a valid URL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn callback_rows(kb: &InlineKeyboardMarkup) -> Vec<Vec<String>> {
        kb.inline_keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| match &b.kind {
                        InlineKeyboardButtonKind::CallbackData(data) => data.clone(),
                        other => format!("{:?}", other),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn years_are_three_per_row() {
        let kb = years_keyboard(&[2015, 2016, 2017, 2018]);
        let rows = callback_rows(&kb);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["video_list:2015", "video_list:2016", "video_list:2017"]);
        assert_eq!(rows[1], vec!["video_list:2018"]);
    }

    #[test]
    fn episodes_are_five_per_row_with_back_button() {
        let episodes: Vec<i32> = (230..242).collect();
        let rows = callback_rows(&episodes_keyboard(2015, &episodes));

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].len(), 5);
        assert_eq!(rows[1].len(), 5);
        assert_eq!(rows[2], vec!["video_item:2015,240", "video_item:2015,241"]);
        assert_eq!(rows[3], vec!["libraries:"]);
    }

    #[test]
    fn empty_year_still_offers_back() {
        let rows = callback_rows(&episodes_keyboard(2015, &[]));
        assert_eq!(rows, vec![vec!["libraries:".to_string()]]);
    }

    #[test]
    fn item_keyboard_depends_on_access() {
        let owned = callback_rows(&video_item_keyboard(2015, 230, true));
        assert_eq!(owned[0], vec!["video_link:230"]);

        let locked = callback_rows(&video_item_keyboard(2015, 230, false));
        assert_eq!(locked[0], vec!["invoice:2015,230"]);
        assert_eq!(locked[1], vec!["invoice:subscription"]);
        assert_eq!(locked[2], vec!["video_list:2015"]);
    }

    #[test]
    fn support_link_points_to_whatsapp() {
        assert_eq!(
            support_url("+6281234").unwrap().as_str(),
            "https://wa.me/6281234"
        );
    }
}
