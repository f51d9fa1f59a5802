use crate::message_config::{Field, MessageConfig};
use crate::overseerr::{MediaDetails, MediaKind};

/// Render the notification body from one configuration snapshot. Fields that
/// are disabled or have no usable data are omitted; if nothing renders, a
/// fixed two-line fallback keeps the notification from being dropped.
pub fn render_message(
    config: &MessageConfig,
    details: &MediaDetails,
    kind: MediaKind,
    requester: Option<&str>,
) -> String {
    let mut parts = Vec::new();

    for field in config.enabled_fields_in_order() {
        let fragment = match field {
            Field::Title => title_field(config, details, kind),
            Field::Requester => requester_field(config, requester),
            Field::Synopsis => synopsis_field(config, details),
            Field::Rating => rating_field(config, details),
            Field::Links => links_field(config, details, kind),
            Field::Cast => cast_field(config, details),
            Field::Crew => crew_field(config, details),
            // Decides photo-vs-text delivery, never a text fragment.
            Field::Picture => None,
        };
        if let Some(fragment) = fragment {
            parts.push(fragment);
        }
    }

    if parts.is_empty() {
        fallback_message(details, kind, requester)
    } else {
        parts.join("\n\n")
    }
}

/// Emoji prefixed to the text body when the picture field is enabled but no
/// poster URL is available.
pub fn picture_fallback_emoji(config: &MessageConfig) -> String {
    config
        .field(Field::Picture)
        .fallback_emoji
        .clone()
        .unwrap_or_else(|| "🎬".to_string())
}

fn display_title<'a>(details: &'a MediaDetails, kind: MediaKind) -> Option<&'a str> {
    let title = match kind {
        MediaKind::Movie => details.title.as_deref(),
        MediaKind::Tv => details.name.as_deref(),
    };
    title.filter(|t| !t.is_empty())
}

/// First four characters of the date string, required to be at least four
/// characters long; anything shorter omits the year silently.
fn year_of(date: &str) -> Option<&str> {
    date.get(..4)
}

fn title_field(config: &MessageConfig, details: &MediaDetails, kind: MediaKind) -> Option<String> {
    let s = config.field(Field::Title);
    let mut title = display_title(details, kind)?.to_string();

    if s.show_year.unwrap_or(true) {
        let date = match kind {
            MediaKind::Movie => details.release_date.as_deref(),
            MediaKind::Tv => details.first_air_date.as_deref(),
        };
        if let Some(year) = date.and_then(year_of) {
            title.push_str(&format!(" ({year})"));
        }
    }

    if s.show_emoji.unwrap_or(true) {
        let emoji = match kind {
            MediaKind::Movie => s.movie_emoji.as_deref().unwrap_or("🎬"),
            MediaKind::Tv => s.tv_emoji.as_deref().unwrap_or("📺"),
        };
        Some(format!("{emoji} *{title}*"))
    } else {
        Some(format!("*{title}*"))
    }
}

fn requester_field(config: &MessageConfig, requester: Option<&str>) -> Option<String> {
    let requester = requester.filter(|r| !r.is_empty())?;
    let template = config
        .field(Field::Requester)
        .format
        .as_deref()
        .unwrap_or("Requested by: {username}");
    Some(template.replace("{username}", requester))
}

fn synopsis_field(config: &MessageConfig, details: &MediaDetails) -> Option<String> {
    let s = config.field(Field::Synopsis);
    let max_length = s.max_length.unwrap_or(300);

    let synopsis = match details.overview.as_deref().filter(|o| !o.is_empty()) {
        Some(overview) => truncate(overview, max_length),
        None if config.is_debug_mode() => s
            .fallback
            .clone()
            .unwrap_or_else(|| "No synopsis available.".to_string()),
        None => return None,
    };

    Some(format!("*Synopsis:* {synopsis}"))
}

/// Cut to `max_length - 3` characters plus a three-character ellipsis marker,
/// so the total length equals `max_length`. A limit under four characters
/// leaves no room for content; the marker itself is clamped so the result
/// never exceeds the limit.
fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
    cut.push_str("...");
    cut.chars().take(max_length).collect()
}

fn rating_field(config: &MessageConfig, details: &MediaDetails) -> Option<String> {
    let s = config.field(Field::Rating);
    let mut ratings = Vec::new();

    if s.show_tmdb.unwrap_or(true) {
        if let Some(score) = details.vote_average.filter(|v| *v > 0.0) {
            ratings.push(format!("{score:.1}/10 (TMDb)"));
        }
    }
    if s.show_imdb.unwrap_or(false) {
        if let Some(score) = details.imdb_rating.filter(|v| *v > 0.0) {
            ratings.push(format!("{score:.1}/10 (IMDb)"));
        }
    }

    if !ratings.is_empty() {
        Some(format!("*Rating:* {}", ratings.join(" | ")))
    } else if config.is_debug_mode() {
        let fallback = s.fallback.as_deref().unwrap_or("Not Rated");
        Some(format!("*Rating:* {fallback}"))
    } else {
        None
    }
}

fn links_field(config: &MessageConfig, details: &MediaDetails, kind: MediaKind) -> Option<String> {
    let s = config.field(Field::Links);

    // No external ids at all means the upstream record carried no externalIds
    // section; the field is skipped rather than synthesized from the media id.
    let ids = &details.external_ids;
    let has_external = ids.imdb_id.as_deref().is_some_and(|i| !i.is_empty())
        || ids.tmdb_id.is_some()
        || ids.tvdb_id.is_some();
    if !has_external {
        return None;
    }

    let mut links = Vec::new();

    if s.show_imdb.unwrap_or(true) {
        if let Some(id) = details.external_ids.imdb_id.as_deref().filter(|i| !i.is_empty()) {
            links.push(format!("[IMDb](https://www.imdb.com/title/{id}/)"));
        }
    }
    if s.show_tmdb.unwrap_or(true) {
        if let Some(id) = details.external_ids.tmdb_id.or(details.id) {
            links.push(format!(
                "[TMDb](https://www.themoviedb.org/{}/{id})",
                kind.as_str()
            ));
        }
    }
    if s.show_tvdb.unwrap_or(false) {
        if let Some(id) = details.external_ids.tvdb_id {
            links.push(format!("[TVDB](https://www.thetvdb.com/dereferrer/series/{id})"));
        }
    }

    if links.is_empty() {
        None
    } else {
        Some(format!("*Links:* {}", links.join(" | ")))
    }
}

fn cast_field(config: &MessageConfig, details: &MediaDetails) -> Option<String> {
    let s = config.field(Field::Cast);
    let max_items = s.max_items.unwrap_or(5);

    let names: Vec<&str> = details
        .credits
        .cast
        .iter()
        .take(max_items)
        .filter_map(|member| member.name.as_deref().filter(|n| !n.is_empty()))
        .collect();
    if names.is_empty() {
        return None;
    }

    let separator = s.separator.as_deref().unwrap_or(", ");
    let template = s.format.as_deref().unwrap_or("Cast: {cast_list}");
    Some(template.replace("{cast_list}", &names.join(separator)))
}

fn crew_field(config: &MessageConfig, details: &MediaDetails) -> Option<String> {
    let s = config.field(Field::Crew);
    let max_items = s.max_items.unwrap_or(3);
    let default_roles = ["Director", "Producer", "Writer"];

    let mut entries = Vec::new();
    for member in &details.credits.crew {
        if entries.len() >= max_items {
            break;
        }
        let (Some(name), Some(job)) = (member.name.as_deref(), member.job.as_deref()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let allowed = match &s.roles {
            Some(roles) => roles.iter().any(|r| r == job),
            None => default_roles.contains(&job),
        };
        if allowed {
            entries.push(format!("{name} ({job})"));
        }
    }
    if entries.is_empty() {
        return None;
    }

    let separator = s.separator.as_deref().unwrap_or(", ");
    let template = s.format.as_deref().unwrap_or("Crew: {crew_list}");
    Some(template.replace("{crew_list}", &entries.join(separator)))
}

fn fallback_message(details: &MediaDetails, kind: MediaKind, requester: Option<&str>) -> String {
    let title = display_title(details, kind).unwrap_or("Unknown Title");
    let requester = requester.filter(|r| !r.is_empty()).unwrap_or("Unknown User");
    let (emoji, label) = match kind {
        MediaKind::Movie => ("🎬", "Movie"),
        MediaKind::Tv => ("📺", "TV Show"),
    };
    format!("{emoji} *New {label} Request!*\n\n*Title:* {title}\n*Requested by:* {requester}")
}
