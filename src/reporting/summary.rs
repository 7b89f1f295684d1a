// Human-readable run summary: a fixed-width table with one line per reported
// event followed by run totals.

use crate::core_modules::event::{Classification, Event};
use crate::pipeline::RunStatistics;
use std::io::Write;

pub fn write_summary<'a>(
    writer: &mut impl Write,
    events: impl IntoIterator<Item = &'a Event>,
    stats: &RunStatistics,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{:>8} {:>8} {:>8} {:>6} {:>12} {:>14} {:>10}",
        "event", "start", "end", "obs", "class", "interesting", "mean_area"
    )?;
    let (mut interesting, mut boring, mut total) = (0usize, 0usize, 0usize);
    for event in events {
        total += 1;
        match event.classification() {
            Classification::Interesting => interesting += 1,
            Classification::Boring => boring += 1,
            Classification::Candidate => {}
        }
        writeln!(
            writer,
            "{:>8} {:>8} {:>8} {:>6} {:>12} {:>14.4} {:>10.1}",
            event.id(),
            event.first_frame(),
            event.last_frame(),
            event.observation_count(),
            event.classification().to_string(),
            event.interestingness(),
            event.mean_area()
        )?;
    }
    writeln!(writer)?;
    writeln!(writer, "events reported:   {total}")?;
    writeln!(writer, "  interesting:     {interesting}")?;
    writeln!(writer, "  boring:          {boring}")?;
    writeln!(writer, "events discarded:  {}", stats.events_discarded)?;
    writeln!(writer, "frames processed:  {}", stats.frames_processed)?;
    writeln!(writer, "frames skipped:    {}", stats.frames_skipped)?;
    writeln!(writer, "winners:           {}", stats.winners)?;
    writeln!(writer, "winners rejected:  {}", stats.rejected)?;
    Ok(())
}

/// One `event frame x y` line per observation.
pub fn write_positions<'a>(writer: &mut impl Write, events: impl IntoIterator<Item = &'a Event>) -> std::io::Result<()> {
    for event in events {
        for winner in event.winners() {
            let c = winner.region().centroid;
            writeln!(writer, "{} {} {:.3} {:.3}", event.id(), winner.frame_num(), c.x, c.y)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::event::MotionModel;
    use crate::core_modules::event_set::{EventSet, Mutation};
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::{AttentionPoint, Winner};

    fn single_event_set() -> EventSet {
        let px = [(4, 4, 10), (5, 4, 10), (4, 5, 10), (5, 5, 10)];
        let point = AttentionPoint {
            position: Vector2D::new(4.5, 4.5),
            saliency: 1.0,
            rank: 0,
        };
        let winner = Winner::new(point, Region::from_pixels(&px).unwrap(), 9);
        let motion = MotionModel::Fixed(winner.region().centroid);
        let mut set = EventSet::new();
        set.apply(9, vec![Mutation::Spawn { winner, motion }]).unwrap();
        set
    }

    #[test]
    fn positions_are_one_line_per_observation() {
        let set = single_event_set();
        let mut out = Vec::new();
        write_positions(&mut out, set.live()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0 9 4.500 4.500\n");
    }

    #[test]
    fn summary_counts_the_events() {
        let set = single_event_set();
        let stats = RunStatistics {
            frames_processed: 12,
            ..RunStatistics::default()
        };
        let mut out = Vec::new();
        write_summary(&mut out, set.live(), &stats).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("events reported:   1"));
        assert!(text.contains("frames processed:  12"));
        assert_eq!(text.lines().nth(1).unwrap().split_whitespace().next(), Some("0"));
    }
}
