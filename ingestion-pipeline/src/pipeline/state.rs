use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Converted, Analyzed, Enriched, Chunked, Embedded, Persisted, Failed],
    events {
        convert { transition: { from: Ready, to: Converted } }
        analyze { transition: { from: Converted, to: Analyzed } }
        enrich { transition: { from: Analyzed, to: Enriched } }
        chunk { transition: { from: Enriched, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        persist { transition: { from: Embedded, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Converted, to: Failed }
            transition: { from: Analyzed, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
