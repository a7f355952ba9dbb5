//! Processing order of a graph with cycles.
//!
//! Streams are ordered so every stream runs after the streams it reads
//! from. Cycles are found with a Pearce variant of Tarjan's strongly
//! connected components search, run iteratively over an explicit stack.
//! Inside a cycle:
//!
//! - streams whose engine is a cycle breaker move to the tail partition,
//!   starting at `first_cycle_breaker`. They produce their block before
//!   reading input, so they need not precede their consumers; the rest of
//!   the cycle is searched again without them.
//! - a cycle with no cycle breaker is muted: its members are ordered before
//!   their consumers and output silence.
//!
//! Sources are always first, in their original relative order.

/// One stream as seen by the ordering pass.
#[derive(Clone, Debug, Default)]
pub struct OrderNode {
    /// False for sources, which take no input.
    pub is_processed: bool,
    /// True if the stream may break a cycle.
    pub is_cycle_breaker: bool,
    /// Indices of the nodes this node reads from. Out-of-range indices are
    /// ignored.
    pub inputs: Vec<usize>,
}

/// Result of [`compute_order`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOrder {
    /// Every node index exactly once, in processing order.
    pub order: Vec<usize>,
    /// Position in `order` of the first cycle breaker; equals the length
    /// when there are none.
    pub first_cycle_breaker: usize,
    /// Per node index: true if it sits in a cycle without a breaker.
    pub in_muted_cycle: Vec<bool>,
}

const NOT_VISITED: u32 = u32::MAX;
const IN_MUTED_CYCLE: u32 = 1;
const NIL: usize = usize::MAX;

#[derive(Clone, Copy, PartialEq, Eq)]
enum List {
    Dfs,
    Scc,
}

/// Two intrusive doubly linked lists over node indices. A node belongs to at
/// most one list at a time.
struct Lists {
    prev: Vec<usize>,
    next: Vec<usize>,
    owner: Vec<Option<List>>,
    dfs_head: usize,
    scc_head: usize,
}

impl Lists {
    fn new(n: usize) -> Self {
        Self {
            prev: vec![NIL; n],
            next: vec![NIL; n],
            owner: vec![None; n],
            dfs_head: NIL,
            scc_head: NIL,
        }
    }

    fn head_mut(&mut self, list: List) -> &mut usize {
        match list {
            List::Dfs => &mut self.dfs_head,
            List::Scc => &mut self.scc_head,
        }
    }

    fn first(&self, list: List) -> Option<usize> {
        let head = match list {
            List::Dfs => self.dfs_head,
            List::Scc => self.scc_head,
        };
        (head != NIL).then_some(head)
    }

    fn next_of(&self, i: usize) -> Option<usize> {
        (self.next[i] != NIL).then_some(self.next[i])
    }

    fn insert_front(&mut self, list: List, i: usize) {
        debug_assert!(self.owner[i].is_none());
        let head = *self.head_mut(list);
        self.prev[i] = NIL;
        self.next[i] = head;
        if head != NIL {
            self.prev[head] = i;
        }
        *self.head_mut(list) = i;
        self.owner[i] = Some(list);
    }

    fn remove(&mut self, i: usize) {
        let Some(list) = self.owner[i].take() else {
            return;
        };
        let (prev, next) = (self.prev[i], self.next[i]);
        if prev == NIL {
            *self.head_mut(list) = next;
        } else {
            self.next[prev] = next;
        }
        if next != NIL {
            self.prev[next] = prev;
        }
        self.prev[i] = NIL;
        self.next[i] = NIL;
    }
}

fn processed_inputs(nodes: &[OrderNode], i: usize) -> impl Iterator<Item = usize> + '_ {
    nodes[i]
        .inputs
        .iter()
        .copied()
        .filter(move |&s| s < nodes.len() && nodes[s].is_processed)
}

/// Orders `nodes` for processing.
pub fn compute_order(nodes: &[OrderNode]) -> StreamOrder {
    let n = nodes.len();
    let mut order = vec![NIL; n];
    let mut ordered = 0usize;
    let mut first_cycle_breaker = n;
    let mut marker = vec![0u32; n];
    let mut next_stack_marker = NOT_VISITED - 1;
    let mut lists = Lists::new(n);

    // Seed the DFS stack in reverse so that it pops in original order.
    for i in (0..n).rev() {
        if nodes[i].is_processed {
            marker[i] = NOT_VISITED;
            lists.insert_front(List::Dfs, i);
        }
    }
    for (i, node) in nodes.iter().enumerate() {
        if !node.is_processed {
            order[ordered] = i;
            ordered += 1;
        }
    }

    while let Some(ps) = lists.first(List::Dfs) {
        if marker[ps] == NOT_VISITED {
            // First visit: stay on the stack, unvisited inputs go above.
            marker[ps] = next_stack_marker;
            next_stack_marker -= 1;
            let inputs: Vec<usize> = processed_inputs(nodes, ps).collect();
            for &input in inputs.iter().rev() {
                if marker[input] == NOT_VISITED && lists.owner[input] == Some(List::Dfs) {
                    lists.remove(input);
                    lists.insert_front(List::Dfs, input);
                }
            }
            continue;
        }

        lists.remove(ps);

        // Highest marker among inputs still on the stack; excludes `ps`
        // itself unless it is part of a cycle.
        let cycle_stack_marker = processed_inputs(nodes, ps).map(|i| marker[i]).max().unwrap_or(0);

        if cycle_stack_marker <= IN_MUTED_CYCLE {
            marker[ps] = 0;
            order[ordered] = ps;
            ordered += 1;
            continue;
        }

        lists.insert_front(List::Scc, ps);

        if cycle_stack_marker > marker[ps] {
            marker[ps] = cycle_stack_marker;
            continue;
        }

        // `ps` is the root of a complete SCC.
        let mut have_breaker = false;
        let mut next = lists.first(List::Scc);
        while let Some(s) = next
            && marker[s] <= cycle_stack_marker
        {
            next = lists.next_of(s);
            if nodes[s].is_cycle_breaker {
                have_breaker = true;
                lists.remove(s);
                marker[s] = 0;
                first_cycle_breaker -= 1;
                order[first_cycle_breaker] = s;
            }
        }
        let after_scc = next;
        while let Some(s) = lists.first(List::Scc)
            && Some(s) != after_scc
        {
            lists.remove(s);
            if have_breaker {
                marker[s] = NOT_VISITED;
                lists.insert_front(List::Dfs, s);
            } else {
                marker[s] = IN_MUTED_CYCLE;
                order[ordered] = s;
                ordered += 1;
            }
        }
    }

    assert_eq!(ordered, first_cycle_breaker, "every stream must be ordered exactly once");
    StreamOrder {
        order,
        first_cycle_breaker,
        in_muted_cycle: marker.iter().map(|&m| m == IN_MUTED_CYCLE).collect(),
    }
}
