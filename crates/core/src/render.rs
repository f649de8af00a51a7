use rust_decimal::Decimal;

use crate::domain::beer::{Beer, UserId};

pub const LEADERBOARD_SIZE: usize = 5;

/// Counts entries per key, keeping the order in which each key first appears.
pub fn group_counts<F>(beers: &[Beer], key: F) -> Vec<(UserId, u32)>
where
    F: Fn(&Beer) -> &UserId,
{
    let mut groups: Vec<(UserId, u32)> = Vec::new();
    for beer in beers {
        let user = key(beer);
        match groups.iter_mut().find(|(existing, _)| existing == user) {
            Some((_, count)) => *count += 1,
            None => groups.push((user.clone(), 1)),
        }
    }
    groups
}

pub fn format_amount(unit_price: Decimal, count: u32) -> String {
    format!("{:.2}", unit_price * Decimal::from(count))
}

/// Title line followed by one `mention: count` line per group.
pub fn render_list(
    title: &str,
    groups: &[(UserId, u32)],
    include_price: bool,
    unit_price: Decimal,
) -> String {
    let mut lines = Vec::with_capacity(groups.len() + 1);
    lines.push(title.to_owned());
    for (user, count) in groups {
        if include_price {
            lines.push(format!(
                "{}: {count} (~${})",
                user.mention(),
                format_amount(unit_price, *count)
            ));
        } else {
            lines.push(format!("{}: {count}", user.mention()));
        }
    }
    lines.join("\n")
}

/// Highest counts first; equal counts keep their incoming order.
pub fn top_receivers(mut groups: Vec<(UserId, u32)>) -> Vec<(UserId, u32)> {
    groups.sort_by(|left, right| right.1.cmp(&left.1));
    groups.truncate(LEADERBOARD_SIZE);
    groups
}

pub fn render_leaderboard(emoji_token: &str, groups: &[(UserId, u32)]) -> String {
    render_list(
        &format!("Here are the top {LEADERBOARD_SIZE} people owed {emoji_token}"),
        groups,
        false,
        Decimal::ZERO,
    )
}

pub fn owed_title(emoji_token: &str, total: u32, include_price: bool, unit_price: Decimal) -> String {
    if include_price {
        format!("You are owed ~${} worth of {emoji_token}", format_amount(unit_price, total))
    } else {
        format!("You are owed {total} {emoji_token}'s")
    }
}

pub fn iou_title(
    user: &UserId,
    emoji_token: &str,
    total: u32,
    include_price: bool,
    unit_price: Decimal,
) -> String {
    if include_price {
        format!(
            "{}, you owe the following people ~${} worth of {emoji_token}",
            user.mention(),
            format_amount(unit_price, total)
        )
    } else {
        format!("{}, you owe the following people a {emoji_token}", user.mention())
    }
}
