//! Plain-text rendering of map frames.

use incident_map_incident_models::Incident;
use incident_map_sync::session::MapFrame;

/// One-line summary of a frame: counts, live status and camera.
pub fn summary(frame: &MapFrame) -> String {
    let viewport = frame.camera.viewport;
    let mut line = format!(
        "{} of {} incidents | {} | camera {} at ({:.4}, {:.4}) z{}",
        frame.incidents.len(),
        frame.total,
        frame.live.label(),
        frame.camera.tier,
        viewport.center.latitude,
        viewport.center.longitude,
        viewport.zoom,
    );
    if frame.loading {
        line.push_str(" | loading");
    }
    line
}

/// One line per incident, marking the highlighted one.
pub fn incident_line(incident: &Incident, highlighted: bool) -> String {
    let position = incident.coordinates().map_or_else(
        || "no position".to_string(),
        |c| format!("({:.5}, {:.5})", c.latitude, c.longitude),
    );
    format!(
        "{} [{}] {} #{} {} {}",
        if highlighted { '*' } else { ' ' },
        incident.severity,
        incident.incident_type.label(),
        incident.id,
        position,
        incident.description,
    )
    .trim_end()
    .to_string()
}

/// Every incident of the frame, in store order.
pub fn incident_lines(frame: &MapFrame) -> impl Iterator<Item = String> + '_ {
    frame.incidents.iter().map(|incident| {
        incident_line(incident, frame.highlight.as_ref() == Some(&incident.id))
    })
}
