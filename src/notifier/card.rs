//! Pure formatting of match and weekly posts. Nothing here talks to Discord,
//! so the layout can be unit tested.

use chrono::{DateTime, Utc};

use crate::db::models::{MatchRecord, ParticipantStats};
use crate::pubg::client::short_id;
use crate::roster::{Platform, TrackedPlayer};
use crate::tracker::weekly::{PlayerWeek, WeeklySummary};

pub const GOLD: u32 = 0xF1C40F;
pub const SILVER: u32 = 0xC0C0C0;
pub const BRONZE: u32 = 0xCD7F32;
pub const BLUE: u32 = 0x3498DB;
pub const RED: u32 = 0xE74C3C;
pub const PURPLE: u32 = 0x9B59B6;

/// Discord rejects embed field values longer than this.
const FIELD_VALUE_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Renderer-neutral embed description.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCard {
    pub title: String,
    pub description: String,
    pub colour: u32,
    pub fields: Vec<CardField>,
    pub footer: String,
}

impl MatchCard {
    fn field(&mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) {
        self.fields.push(CardField {
            name: name.into(),
            value: value.into(),
            inline,
        });
    }
}

/// Colour and medal for a placement.
pub fn rank_style(rank: Option<u32>) -> (u32, &'static str) {
    match rank {
        Some(1) => (GOLD, "🥇"),
        Some(2..=3) => (SILVER, "🥈"),
        Some(4..=5) => (BRONZE, "🥉"),
        Some(6..=10) => (BLUE, "🏅"),
        _ => (RED, "💀"),
    }
}

pub fn map_display_name(map_name: &str) -> String {
    let name = match map_name {
        "Baltic_Main" => "Erangel (Old)",
        "Desert_Main" => "Miramar",
        "DihorOtok_Main" => "Vikendi",
        "Erangel_Main" => "Erangel",
        "Heaven_Main" => "Haven",
        "Kiki_Main" => "Deston",
        "Range_Main" => "Training",
        "Savage_Main" => "Sanhok",
        "Summerland_Main" => "Karakin",
        "Tiger_Main" => "Taego",
        "Chimera_Main" => "Paramo",
        other => return other.trim_end_matches("_Main").to_string(),
    };
    name.to_string()
}

fn map_emoji(map_name: &str) -> &'static str {
    match map_name {
        "Baltic_Main" => "🏔️",
        "Desert_Main" => "🏜️",
        "DihorOtok_Main" => "🏝️",
        "Erangel_Main" => "🌾",
        "Heaven_Main" => "🌸",
        "Kiki_Main" | "Savage_Main" => "🌴",
        "Range_Main" => "🎯",
        "Summerland_Main" => "☀️",
        "Tiger_Main" => "🐯",
        "Chimera_Main" => "🦁",
        _ => "🗺️",
    }
}

/// "squad-fpp" -> "Squad (FPP)"
fn mode_display(game_mode: &str) -> String {
    let base = game_mode.replace("-fpp", " (FPP)");
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_time_ago(played_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(played_at) = played_at else {
        return "recently".into();
    };
    let minutes = (now - played_at).num_minutes().max(0);
    if minutes < 60 {
        format!("{} min ago", minutes)
    } else if minutes < 24 * 60 {
        format!("{} hr ago", minutes / 60)
    } else {
        let days = minutes / (24 * 60);
        format!("{} day{} ago", days, if days > 1 { "s" } else { "" })
    }
}

/// Thousands separator for whole numbers.
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 && digits != "0" {
        out.insert(0, '-');
    }
    out
}

fn player_field(stats: &ParticipantStats) -> CardField {
    let (_, medal) = rank_style(Some(stats.win_place));
    let kd = if stats.win_place == 1 {
        format!("{}/0", stats.kills)
    } else {
        format!("{}/{}", stats.kills, stats.dbnos)
    };
    let value = format!(
        "{} **#{}** • ⏱️ {:.1}m\n```css\n\
         Kills:      {:>3} ({}🎯 {:.0}%)\n\
         K/D:        {:>7}\n\
         Damage:     {:>7}\n\
         Assists:    {:>3}\n\
         Longest:    {:>6.0}m\n\
         Distance:   {:>6.2}km\n\
         Heals:      {:>3} | Boosts: {:>3}\n```",
        medal,
        stats.win_place,
        stats.survival_minutes(),
        stats.kills,
        stats.headshot_kills,
        stats.headshot_percent(),
        kd,
        group_thousands(stats.damage_dealt),
        stats.assists,
        stats.longest_kill,
        stats.distance_km(),
        stats.heals,
        stats.boosts,
    );
    CardField {
        name: format!("👤 {}", stats.name),
        value,
        inline: true,
    }
}

/// Layout for a new match post.
pub fn match_card(record: &MatchRecord, now: DateTime<Utc>) -> MatchCard {
    let summary = &record.summary;
    let best_rank = summary.best_rank();
    let (colour, medal) = rank_style(best_rank);
    let count = summary.participants.len().max(1);

    let mut card = MatchCard {
        title: format!(
            "{} {} - {} Player{}",
            medal,
            summary.category,
            count,
            if count > 1 { "s" } else { "" }
        ),
        description: format!(
            "{} **{}** • 🎮 **{}**\n⏱️ Duration: **{}** min • 🕐 {}",
            map_emoji(&summary.map_name),
            map_display_name(&summary.map_name),
            mode_display(&summary.game_mode),
            summary.duration_secs / 60,
            format_time_ago(record.played_at, now)
        ),
        colour,
        fields: Vec::new(),
        footer: format!("ID: {}...", short_id(&record.match_id)),
    };

    let participants = &summary.participants;
    if participants.is_empty() {
        card.field("👤 Player", record.player.name.clone(), false);
        return card;
    }

    let kills: u32 = participants.iter().map(|p| p.kills).sum();
    let headshots: u32 = participants.iter().map(|p| p.headshot_kills).sum();
    let damage: f64 = participants.iter().map(|p| p.damage_dealt).sum();
    let avg_survival = participants
        .iter()
        .map(ParticipantStats::survival_minutes)
        .sum::<f64>()
        / participants.len() as f64;
    let hs_percent = if kills > 0 {
        headshots as f64 / kills as f64 * 100.0
    } else {
        0.0
    };
    card.field(
        "📊 Team Performance",
        format!(
            "🎯 **Rank:** #{}\n💀 **Kills:** {} ({}🎯 {:.0}%)\n💥 **Damage:** {}\n⏳ **Avg Survival:** {:.1} min",
            best_rank.unwrap_or_default(),
            kills,
            headshots,
            hs_percent,
            group_thousands(damage),
            avg_survival
        ),
        false,
    );

    let mut sorted: Vec<&ParticipantStats> = participants.iter().collect();
    sorted.sort_by(|a, b| {
        a.win_place
            .cmp(&b.win_place)
            .then(b.kills.cmp(&a.kills))
            .then(b.damage_dealt.total_cmp(&a.damage_dealt))
    });
    card.fields.extend(sorted.into_iter().map(player_field));
    card
}

fn best_player_card(best: &PlayerWeek, summary: &WeeklySummary) -> MatchCard {
    let mut card = MatchCard {
        title: "🏆 Player of the Week".into(),
        description: format!("**{}** dominated the battlefield!", best.player),
        colour: GOLD,
        fields: Vec::new(),
        footer: format!(
            "{} → {}",
            summary.since.format("%Y-%m-%d"),
            summary.until.format("%Y-%m-%d")
        ),
    };
    card.field(
        "🎮 Matches",
        format!(
            "**Total:** {}\n**Wins:** {} 🏆\n**Top 5:** {} ({:.1}%)\n**Win Rate:** {:.1}%",
            best.matches,
            best.wins,
            best.top5,
            best.top5_rate(),
            best.win_rate()
        ),
        true,
    );
    card.field(
        "💀 Combat",
        format!(
            "**Avg Kills:** {:.2}\n**Best Game:** {} kills\n**Total Kills:** {}\n**Headshots:** {}",
            best.avg_kills(),
            best.best_kills,
            best.total_kills,
            best.total_headshots
        ),
        true,
    );
    card.field(
        "💥 Damage",
        format!(
            "**Avg:** {:.1}\n**Best:** {:.0}\n**Total:** {:.0}",
            best.avg_damage(),
            best.best_damage,
            best.total_damage
        ),
        true,
    );
    card.field(
        "🤝 Support",
        format!(
            "**Assists:** {}\n**Knockdowns:** {}",
            best.total_assists, best.total_dbnos
        ),
        true,
    );
    card.field(
        "⏳ Survival",
        format!(
            "**Avg:** {:.1} min\n**Best:** {:.1} min",
            best.avg_survival(),
            best.best_survival_min
        ),
        true,
    );
    card.field(
        "🚶 Distance",
        format!(
            "**Avg:** {:.2} km\n**Total:** {:.1} km",
            best.avg_distance_km(),
            best.total_distance_km
        ),
        true,
    );
    card.field("⭐ Score", format!("**{:.0}** points", best.score()), false);
    card
}

fn leaderboard_card(summary: &WeeklySummary, top_n: usize) -> MatchCard {
    let mut card = MatchCard {
        title: "📊 Weekly Leaderboard".into(),
        description: format!("Top {} players of the last 7 days", top_n),
        colour: PURPLE,
        fields: Vec::new(),
        footer: format!("{} players ranked", summary.standings.len()),
    };
    for (idx, p) in summary.standings.iter().take(top_n).enumerate() {
        let medal = match idx {
            0 => "🥇",
            1 => "🥈",
            2 => "🥉",
            _ => "🏅",
        };
        card.field(
            format!("{} #{} {}", medal, idx + 1, p.player),
            format!(
                "**Score:** {:.0}\n**Matches:** {} | **Wins:** {}\n**Avg Kills:** {:.2} | **Dmg:** {:.0}",
                p.score(),
                p.matches,
                p.wins,
                p.avg_kills(),
                p.avg_damage()
            ),
            false,
        );
    }
    card
}

/// Best-player card followed by the leaderboard; empty when nobody played.
pub fn weekly_cards(summary: &WeeklySummary) -> Vec<MatchCard> {
    match summary.standings.first() {
        Some(best) => vec![best_player_card(best, summary), leaderboard_card(summary, 5)],
        None => Vec::new(),
    }
}

/// Numbered roster list, split across fields to stay under the value limit.
pub fn roster_card(players: &[TrackedPlayer]) -> MatchCard {
    let mut card = MatchCard {
        title: "📋 Tracked Players".into(),
        description: format!("Total: {}", players.len()),
        colour: BLUE,
        fields: Vec::new(),
        footer: "!addplayer <name> [platform] • !removeplayer <name> [platform]".into(),
    };

    let mut chunk = String::new();
    for (idx, player) in players.iter().enumerate() {
        let line = if player.platform == Platform::default() {
            format!("{}. **{}**\n", idx + 1, player.name)
        } else {
            format!("{}. **{}** ({})\n", idx + 1, player.name, player.platform)
        };
        if chunk.len() + line.len() > FIELD_VALUE_LIMIT {
            let name = if card.fields.is_empty() { "Players" } else { "Players (cont.)" };
            card.field(name, std::mem::take(&mut chunk), false);
        }
        chunk.push_str(&line);
    }
    if !chunk.is_empty() {
        let name = if card.fields.is_empty() { "Players" } else { "Players (cont.)" };
        card.field(name, chunk, false);
    }
    card
}
