use shelf_db::{Event, EventType, Library};
use tracing::error;

pub async fn write_event(library: &dyn Library, event: EventType) {
    let event = Event::new(event);
    if let Err(err) = library.record_event(event.clone()).await {
        error!("Error writing event: {err:?}, event: {event:?}");
    }
}
