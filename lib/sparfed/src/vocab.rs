//! Vocabularies used to describe statistics and ontologies as RDF.

pub mod stats {
    //! Predicate statistics vocabulary.
    use oxrdf::NamedNodeRef;

    /// Links a predicate to one of its selectivity observations.
    pub const SELECTIVITY_SAMPLE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://w3id.org/sparfed/stats#selectivitySample");
    /// Links a predicate to one of its latency observations.
    pub const TIME_SAMPLE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://w3id.org/sparfed/stats#timeSample");
    /// Direction of the observation, `"forward"` or `"reverse"`.
    pub const DIRECTION: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://w3id.org/sparfed/stats#direction");
    /// Milliseconds since the Unix epoch at which the observation has been made.
    pub const TIMESTAMP: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://w3id.org/sparfed/stats#timestamp");
    /// Observed value, a count or a duration in milliseconds.
    pub const VALUE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("https://w3id.org/sparfed/stats#value");
}

pub mod owl {
    //! The subset of the [OWL](https://www.w3.org/TR/owl2-overview/) vocabulary understood by [`TableReasoner`](crate::TableReasoner).
    use oxrdf::NamedNodeRef;

    pub const EQUIVALENT_CLASS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#equivalentClass");
    pub const EQUIVALENT_PROPERTY: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#equivalentProperty");
    pub const HAS_VALUE: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#hasValue");
    pub const INVERSE_OF: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#inverseOf");
    pub const ON_PROPERTY: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#onProperty");
    pub const SOME_VALUES_FROM: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#someValuesFrom");
    pub const THING: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.w3.org/2002/07/owl#Thing");
}
