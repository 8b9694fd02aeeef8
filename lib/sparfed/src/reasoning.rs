use crate::vocab::owl;
use oxrdf::vocab::rdf;
use oxrdf::{Graph, NamedNode, Term, TermRef, Triple};
use rustc_hash::{FxHashMap, FxHashSet};

/// How deep `owl:someValuesFrom` ranges are followed when fetching missing facts.
const MAX_FETCH_DEPTH: usize = 8;

/// A condition on a property of the members of a class.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct PropertyRestriction {
    pub property: NamedNode,
    pub kind: RestrictionKind,
}

#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum RestrictionKind {
    /// At least one value
    SomeValue,
    /// The given value
    HasValue(Term),
    /// At least one value that is a member of the given class
    SomeValuesFrom(NamedNode),
}

/// Pulls facts that are not known yet.
///
/// Lets a reasoner trigger resolution while classifying.
pub trait MissingFactResolver {
    /// Resolves the values of the predicate for the subject and returns the new facts.
    fn resolve_missing(&self, subject: &Term, predicate: &NamedNode) -> Vec<Triple>;
}

/// The ontology knowledge used during resolution.
pub trait Reasoner: Send + Sync {
    /// The properties declared equivalent to the given one, without the property itself.
    fn equivalent_properties(&self, property: &NamedNode) -> Vec<NamedNode>;

    fn inverse(&self, property: &NamedNode) -> Option<NamedNode>;

    /// The restrictions a resource must fulfill to be a member of the class.
    fn decompose_class(&self, class: &NamedNode) -> Vec<PropertyRestriction>;

    /// The classes the resource is a member of given the facts.
    fn classify(&self, resource: &Term, facts: &Graph) -> Vec<NamedNode>;

    /// If the resource is a member of the class.
    ///
    /// May call the resolver to get the facts needed to decide, and adds them to `facts`.
    fn classify_as(
        &self,
        resource: &Term,
        class: &NamedNode,
        facts: &mut Graph,
        resolver: &dyn MissingFactResolver,
    ) -> bool {
        let _ = resolver;
        self.classify(resource, facts).contains(class)
    }
}

/// The declared inverse of the property, or a synthetic `<property>-inverse` IRI if none is declared.
pub fn inverse_property(reasoner: &dyn Reasoner, property: &NamedNode) -> NamedNode {
    reasoner.inverse(property).unwrap_or_else(|| {
        NamedNode::new_unchecked(format!("{}-inverse", property.as_str()))
    })
}

/// A [`Reasoner`] answering from explicitly declared tables.
///
/// ```
/// use oxrdf::{Graph, NamedNode, Term};
/// use sparfed::{PropertyRestriction, Reasoner, RestrictionKind, TableReasoner};
///
/// let author = NamedNode::new("http://example.com/hasAuthor")?;
/// let book = NamedNode::new("http://example.com/Book")?;
/// let reasoner = TableReasoner::new().with_restriction(
///     book.clone(),
///     PropertyRestriction {
///         property: author.clone(),
///         kind: RestrictionKind::SomeValue,
///     },
/// );
/// let mut facts = Graph::new();
/// let b = NamedNode::new("http://example.com/b")?;
/// facts.insert(&oxrdf::Triple::new(b.clone(), author, NamedNode::new("http://example.com/a")?));
/// assert_eq!(reasoner.classify(&Term::from(b), &facts), vec![book]);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableReasoner {
    equivalents: FxHashMap<NamedNode, Vec<NamedNode>>,
    inverses: FxHashMap<NamedNode, NamedNode>,
    restrictions: FxHashMap<NamedNode, Vec<PropertyRestriction>>,
}

impl TableReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the two properties equivalent.
    #[must_use]
    pub fn with_equivalent_properties(mut self, a: NamedNode, b: NamedNode) -> Self {
        self.add_equivalent_properties(a, b);
        self
    }

    /// Declares the two properties inverse of each other.
    #[must_use]
    pub fn with_inverse(mut self, a: NamedNode, b: NamedNode) -> Self {
        self.inverses.insert(a.clone(), b.clone());
        self.inverses.insert(b, a);
        self
    }

    #[must_use]
    pub fn with_restriction(mut self, class: NamedNode, restriction: PropertyRestriction) -> Self {
        self.restrictions.entry(class).or_default().push(restriction);
        self
    }

    /// Reads `owl:equivalentProperty`, `owl:inverseOf` and the `owl:Restriction`s that are `owl:equivalentClass` of a named class.
    #[must_use]
    pub fn with_ontology(mut self, ontology: &Graph) -> Self {
        for t in ontology.triples_for_predicate(owl::EQUIVALENT_PROPERTY) {
            if let (oxrdf::SubjectRef::NamedNode(a), TermRef::NamedNode(b)) = (t.subject, t.object)
            {
                self.add_equivalent_properties(a.into_owned(), b.into_owned());
            }
        }
        for t in ontology.triples_for_predicate(owl::INVERSE_OF) {
            if let (oxrdf::SubjectRef::NamedNode(a), TermRef::NamedNode(b)) = (t.subject, t.object)
            {
                self = self.with_inverse(a.into_owned(), b.into_owned());
            }
        }
        for t in ontology.triples_for_predicate(owl::EQUIVALENT_CLASS) {
            let oxrdf::SubjectRef::NamedNode(class) = t.subject else {
                continue;
            };
            let restriction = match t.object {
                TermRef::NamedNode(n) => oxrdf::SubjectRef::from(n),
                TermRef::BlankNode(b) => oxrdf::SubjectRef::from(b),
                _ => continue,
            };
            let Some(TermRef::NamedNode(property)) =
                ontology.object_for_subject_predicate(restriction, owl::ON_PROPERTY)
            else {
                continue;
            };
            let kind = if let Some(value) =
                ontology.object_for_subject_predicate(restriction, owl::HAS_VALUE)
            {
                RestrictionKind::HasValue(value.into_owned())
            } else if let Some(TermRef::NamedNode(range)) =
                ontology.object_for_subject_predicate(restriction, owl::SOME_VALUES_FROM)
            {
                if range == owl::THING {
                    RestrictionKind::SomeValue
                } else {
                    RestrictionKind::SomeValuesFrom(range.into_owned())
                }
            } else {
                RestrictionKind::SomeValue
            };
            self.restrictions
                .entry(class.into_owned())
                .or_default()
                .push(PropertyRestriction {
                    property: property.into_owned(),
                    kind,
                });
        }
        self
    }

    fn add_equivalent_properties(&mut self, a: NamedNode, b: NamedNode) {
        if a == b {
            return;
        }
        let left = self.equivalents.entry(a.clone()).or_default();
        if !left.contains(&b) {
            left.push(b.clone());
        }
        let right = self.equivalents.entry(b).or_default();
        if !right.contains(&a) {
            right.push(a);
        }
    }

    /// Fetches the values of the properties restricted by the class that are not known yet.
    fn fetch_missing(
        &self,
        resource: &Term,
        class: &NamedNode,
        facts: &mut Graph,
        resolver: &dyn MissingFactResolver,
        depth: usize,
    ) {
        let Some(subject) = crate::model::as_subject(resource) else {
            return;
        };
        if depth > MAX_FETCH_DEPTH
            || facts.contains(oxrdf::TripleRef::new(subject, rdf::TYPE, class))
        {
            return;
        }
        let Some(restrictions) = self.restrictions.get(class) else {
            return;
        };
        for restriction in restrictions {
            if facts
                .objects_for_subject_predicate(subject, &restriction.property)
                .next()
                .is_none()
            {
                for triple in resolver.resolve_missing(resource, &restriction.property) {
                    facts.insert(&triple);
                }
            }
            if let RestrictionKind::SomeValuesFrom(range) = &restriction.kind {
                let values = facts
                    .objects_for_subject_predicate(subject, &restriction.property)
                    .map(TermRef::into_owned)
                    .collect::<Vec<_>>();
                for value in values {
                    if value != *resource {
                        self.fetch_missing(&value, range, facts, resolver, depth + 1);
                    }
                }
            }
        }
    }

    fn is_member(
        &self,
        resource: &Term,
        class: &NamedNode,
        facts: &Graph,
        visiting: &mut FxHashSet<NamedNode>,
    ) -> bool {
        let Some(subject) = crate::model::as_subject(resource) else {
            return false;
        };
        if facts.contains(oxrdf::TripleRef::new(subject, rdf::TYPE, class)) {
            return true;
        }
        let Some(restrictions) = self.restrictions.get(class) else {
            return false;
        };
        if !visiting.insert(class.clone()) {
            return false;
        }
        let result = restrictions
            .iter()
            .all(|r| self.is_satisfied(resource, r, facts, visiting));
        visiting.remove(class);
        result
    }

    fn is_satisfied(
        &self,
        resource: &Term,
        restriction: &PropertyRestriction,
        facts: &Graph,
        visiting: &mut FxHashSet<NamedNode>,
    ) -> bool {
        let Some(subject) = crate::model::as_subject(resource) else {
            return false;
        };
        let mut values = facts.objects_for_subject_predicate(subject, &restriction.property);
        match &restriction.kind {
            RestrictionKind::SomeValue => values.next().is_some(),
            RestrictionKind::HasValue(value) => values.any(|v| v == value.as_ref()),
            RestrictionKind::SomeValuesFrom(range) => values
                .map(TermRef::into_owned)
                .collect::<Vec<_>>()
                .iter()
                .any(|v| self.is_member(v, range, facts, visiting)),
        }
    }
}

impl Reasoner for TableReasoner {
    fn equivalent_properties(&self, property: &NamedNode) -> Vec<NamedNode> {
        self.equivalents.get(property).cloned().unwrap_or_default()
    }

    fn inverse(&self, property: &NamedNode) -> Option<NamedNode> {
        self.inverses.get(property).cloned()
    }

    fn decompose_class(&self, class: &NamedNode) -> Vec<PropertyRestriction> {
        self.restrictions.get(class).cloned().unwrap_or_default()
    }

    fn classify(&self, resource: &Term, facts: &Graph) -> Vec<NamedNode> {
        let mut classes = Vec::new();
        if let Some(subject) = crate::model::as_subject(resource) {
            for class in facts.objects_for_subject_predicate(subject, rdf::TYPE) {
                if let TermRef::NamedNode(class) = class {
                    classes.push(class.into_owned());
                }
            }
        }
        let mut visiting = FxHashSet::default();
        for class in self.restrictions.keys() {
            if !classes.contains(class) && self.is_member(resource, class, facts, &mut visiting) {
                classes.push(class.clone());
            }
        }
        classes
    }

    fn classify_as(
        &self,
        resource: &Term,
        class: &NamedNode,
        facts: &mut Graph,
        resolver: &dyn MissingFactResolver,
    ) -> bool {
        self.fetch_missing(resource, class, facts, resolver, 0);
        self.is_member(resource, class, facts, &mut FxHashSet::default())
    }
}
