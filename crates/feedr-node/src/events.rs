//! Outcome events written to stdout, one JSON object per line.

use feedr_oracle::{RoundOutcome, RoundStatus};
use feedr_types::{
    Event, EventType, Height, Params, PriceSubmission, RejectionEvent, RoundEvent, ValidatorPower,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Event for one closed round.
pub fn round(height: Height, outcome: &RoundOutcome) -> anyhow::Result<Event> {
    let (event_type, price, reason) = match &outcome.status {
        RoundStatus::Finalized(price) => (EventType::RoundFinalized, Some(*price), None),
        RoundStatus::NotFinalized(reason) => {
            (EventType::RoundNotFinalized, None, Some(reason.to_string()))
        }
    };
    Ok(Event {
        event_type,
        height,
        payload: serde_json::to_value(RoundEvent {
            feeder_id: outcome.feeder_id,
            round_id: outcome.round_id,
            price,
            reason,
        })?,
    })
}

/// Event for a refused submission.
pub fn rejected(height: Height, msg: &PriceSubmission, reason: &str) -> anyhow::Result<Event> {
    Ok(Event {
        event_type: EventType::SubmissionRejected,
        height,
        payload: serde_json::to_value(RejectionEvent {
            validator: msg.validator,
            feeder_id: msg.feeder_id,
            nonce: msg.nonce,
            reason: reason.to_string(),
        })?,
    })
}

pub fn params_updated(height: Height, params: &Params) -> anyhow::Result<Event> {
    Ok(Event {
        event_type: EventType::ParamsUpdated,
        height,
        payload: serde_json::to_value(params)?,
    })
}

pub fn validator_set_changed(height: Height, set: &[ValidatorPower]) -> anyhow::Result<Event> {
    Ok(Event {
        event_type: EventType::ValidatorSetChanged,
        height,
        payload: serde_json::to_value(set)?,
    })
}

/// Write events as JSON lines and flush.
pub async fn write_all<W: AsyncWrite + Unpin>(out: &mut W, events: &[Event]) -> anyhow::Result<()> {
    for event in events {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_oracle::NotFinalized;
    use feedr_types::Price;

    #[test]
    fn test_round_events() {
        let finalized = round(
            110,
            &RoundOutcome {
                feeder_id: 1,
                round_id: 1,
                status: RoundStatus::Finalized(Price::new(1000, 2)),
            },
        )
        .expect("event");
        assert_eq!(finalized.event_type, EventType::RoundFinalized);
        assert_eq!(finalized.payload["price"]["value"], "1000");

        let missed = round(
            120,
            &RoundOutcome {
                feeder_id: 1,
                round_id: 2,
                status: RoundStatus::NotFinalized(NotFinalized::NoSubmissions),
            },
        )
        .expect("event");
        assert_eq!(missed.event_type, EventType::RoundNotFinalized);
        assert!(missed.payload["price"].is_null());
        assert_eq!(missed.payload["reason"], "no submissions");
    }

    #[tokio::test]
    async fn test_write_json_lines() {
        let event = params_updated(5, &Params::default()).expect("event");
        let mut out = Vec::new();
        write_all(&mut out, &[event.clone(), event]).await.expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"{"event_type":"params_updated","height":5"#));
    }
}
