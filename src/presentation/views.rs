//! Plain-text rendering of view states for the terminal driver.

use std::fmt::Write as _;
use std::rc::Rc;

use portal_api_types::{Character, Episode, Location, Paged};

use crate::cache::{QueryView, StageState};

/// Title line with the view's loading and staleness markers.
fn heading<V>(out: &mut String, title: &str, view: &QueryView<V>) {
    out.push_str(title);
    if view.is_loading {
        out.push_str(" [loading]");
    }
    if view.is_stale {
        out.push_str(" [stale]");
    }
    out.push('\n');
}

/// Error or placeholder for a view without data; `true` when nothing else
/// should be rendered.
fn placeholder<V>(out: &mut String, indent: &str, view: &QueryView<V>) -> bool {
    if let Some(error) = view.error.as_ref() {
        let _ = writeln!(out, "{indent}error: {error}");
        return true;
    }
    if view.data.is_none() {
        let text = if view.is_loading {
            "loading..."
        } else {
            "nothing to show"
        };
        let _ = writeln!(out, "{indent}{text}");
        return true;
    }
    false
}

fn page_summary<T>(out: &mut String, page: u32, paged: &Paged<T>) {
    if paged.is_empty() {
        out.push_str("  no matches\n");
        return;
    }
    let _ = writeln!(
        out,
        "  page {page} of {}, {} results",
        paged.info.pages, paged.info.count
    );
}

fn character_row(out: &mut String, indent: &str, character: &Character) {
    let _ = writeln!(
        out,
        "{indent}{:>4}  {:<24}  {:<7}  {}",
        character.id,
        character.name,
        character.status.as_str(),
        character.species
    );
}

pub fn render_characters(view: &QueryView<Rc<Paged<Character>>>, page: u32) -> String {
    let mut out = String::new();
    heading(&mut out, "Characters", view);
    if placeholder(&mut out, "  ", view) {
        return out;
    }
    if let Some(paged) = view.data.as_ref() {
        page_summary(&mut out, page, paged);
        for character in &paged.results {
            character_row(&mut out, "  ", character);
        }
    }
    out
}

fn episode_row(out: &mut String, episode: &Episode) {
    let _ = writeln!(
        out,
        "  {:<7}  {:<32}  {}",
        episode.episode, episode.name, episode.air_date
    );
}

pub fn render_episodes(view: &QueryView<Rc<Paged<Episode>>>, page: u32) -> String {
    let mut out = String::new();
    heading(&mut out, "Episodes", view);
    if placeholder(&mut out, "  ", view) {
        return out;
    }
    if let Some(paged) = view.data.as_ref() {
        page_summary(&mut out, page, paged);
        for episode in &paged.results {
            episode_row(&mut out, episode);
        }
    }
    out
}

/// Render the location chain: search options, the selection and its residents.
pub fn render_locations(
    options: &QueryView<Rc<Vec<Location>>>,
    location: &QueryView<Rc<Location>>,
    residents: &QueryView<Rc<Vec<Character>>>,
    chain: &StageState,
) -> String {
    let mut out = String::new();

    heading(&mut out, "Locations", options);
    if !placeholder(&mut out, "  ", options) {
        if let Some(options) = options.data.as_ref() {
            if options.is_empty() {
                out.push_str("  no matches\n");
            }
            for (index, option) in options.iter().enumerate() {
                let _ = writeln!(out, "  [{index}] {} ({})", option.name, option.kind);
            }
        }
    }

    heading(&mut out, "Selected", location);
    if !placeholder(&mut out, "  ", location) {
        if let Some(location) = location.data.as_ref() {
            let _ = writeln!(
                out,
                "  {} ({}), {} residents",
                location.name,
                location.kind,
                location.residents.len()
            );
        }
    }

    heading(&mut out, "Residents", residents);
    match chain {
        StageState::Unselected if residents.data.is_none() => {
            out.push_str("  no location selected\n");
        }
        StageState::UpstreamError(_) => {
            out.push_str("  unavailable until the location loads\n");
        }
        _ => {
            if !placeholder(&mut out, "  ", residents) {
                if let Some(residents) = residents.data.as_ref() {
                    if residents.is_empty() {
                        out.push_str("  nobody lives here\n");
                    }
                    for character in residents.iter() {
                        character_row(&mut out, "  ", character);
                    }
                }
            }
        }
    }

    out
}
