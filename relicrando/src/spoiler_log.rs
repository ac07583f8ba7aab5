use std::cmp::Ordering;

use hashbrown::HashSet;
use relicrando_game::{AccessModel, TokenId};
use serde::Serialize;

use crate::errors::ProofError;
use crate::randomize::Randomization;
use crate::traverse::ProofDag;

/// Minimized proof node: a collapsed dependency chain plus the branch
/// requirements that diverge at its end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpoilerSolution {
    /// Token names joined by `" < "` when rendered: each token needs
    /// the one that follows it.
    pub items: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub solution: Vec<SpoilerSolution>,
}

#[derive(Serialize)]
pub struct SpoilerPlacement {
    pub location: String,
    pub token: String,
}

#[derive(Serialize)]
pub struct SpoilerLog {
    pub seed: u64,
    pub nonce: u64,
    pub placements: Vec<SpoilerPlacement>,
    pub proof: Vec<SpoilerSolution>,
    pub proof_text: Vec<String>,
}

/// Scoring triple for one alternative sub-solution. `avg` is compared
/// as the cross-multiplied rational weight/count to keep the tie-break
/// free of floating point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Score {
    depth: usize,
    weight: usize,
    count: usize,
}

impl Score {
    fn compare(&self, other: &Score) -> Ordering {
        self.depth
            .cmp(&other.depth)
            .then(self.weight.cmp(&other.weight))
            .then((self.weight * other.count).cmp(&(other.weight * self.count)))
    }
}

/// Proof tree after alternative selection: one requirement set per token.
#[derive(Clone, Debug)]
struct SelNode {
    token: TokenId,
    reqs: Vec<SelNode>,
    depth: usize,
    closure: HashSet<TokenId>,
}

fn select_nodes(model: &AccessModel, proof: &ProofDag) -> Result<Vec<Option<SelNode>>, ProofError> {
    let num_tokens = model.token_isv.keys.len();
    let mut nodes: Vec<Option<SelNode>> = vec![None; num_tokens];
    for &t in &proof.order {
        if t >= num_tokens {
            return Err(ProofError(format!("token id {t} out of range")));
        }
        if nodes[t].is_some() {
            return Err(ProofError(format!(
                "token \"{}\" proven twice",
                model.token_name(t)
            )));
        }
        let mut best: Option<(Score, Vec<SelNode>)> = None;
        for alt in &proof.requires[t] {
            let mut members: Vec<SelNode> = Vec::with_capacity(alt.len());
            for &u in alt {
                let member = nodes.get(u).and_then(|n| n.clone()).ok_or_else(|| {
                    ProofError(format!(
                        "token \"{}\" required before it is proven",
                        model
                            .token_isv
                            .keys
                            .get(u)
                            .map(|s| s.as_str())
                            .unwrap_or("<invalid>")
                    ))
                })?;
                members.push(member);
            }
            let score = Score {
                depth: 1 + members.iter().map(|m| m.depth).max().unwrap_or(0),
                weight: members.iter().map(|m| m.depth).sum(),
                count: members.len().max(1),
            };
            // Strict comparison keeps the earliest-encountered
            // alternative on ties.
            let replace = match &best {
                None => true,
                Some((best_score, _)) => score.compare(best_score) == Ordering::Less,
            };
            if replace {
                best = Some((score, members));
            }
        }
        let (depth, reqs) = match best {
            None => (0, vec![]),
            Some((score, members)) => (score.depth, members),
        };
        let node = prune_node(SelNode {
            token: t,
            reqs,
            depth,
            closure: HashSet::new(),
        });
        nodes[t] = Some(node);
    }
    Ok(nodes)
}

/// Sort requirements by descending depth and drop any whose transitive
/// ability closure adds nothing beyond the requirements kept so far.
fn prune_node(mut node: SelNode) -> SelNode {
    node.reqs
        .sort_by(|a, b| b.depth.cmp(&a.depth));
    let mut kept: Vec<SelNode> = vec![];
    let mut union: HashSet<TokenId> = HashSet::new();
    for req in node.reqs {
        if req.closure.is_subset(&union) {
            continue;
        }
        union.extend(req.closure.iter().copied());
        kept.push(req);
    }
    union.insert(node.token);
    node.reqs = kept;
    node.closure = union;
    node
}

/// Collapse linear chains: while a node has exactly one requirement,
/// its token joins the compound chain; a multi-requirement node fans
/// out into branch solutions at the end of the chain.
fn collapse(model: &AccessModel, node: &SelNode) -> SpoilerSolution {
    let mut items = vec![model.token_name(node.token).to_string()];
    let mut cur = node;
    while cur.reqs.len() == 1 {
        cur = &cur.reqs[0];
        items.push(model.token_name(cur.token).to_string());
    }
    let solution = if cur.reqs.len() >= 2 {
        cur.reqs.iter().map(|req| collapse(model, req)).collect()
    } else {
        vec![]
    };
    SpoilerSolution { items, solution }
}

/// Collapse the raw proof DAG into the structurally simplest equivalent
/// explanation. Top-level entries are the tokens no other token's kept
/// requirements reference, in collection order.
pub fn minify_proof(
    model: &AccessModel,
    proof: &ProofDag,
) -> Result<Vec<SpoilerSolution>, ProofError> {
    let nodes = select_nodes(model, proof)?;
    let mut referenced: HashSet<TokenId> = HashSet::new();
    for &t in &proof.order {
        if let Some(node) = &nodes[t] {
            mark_referenced(node, &mut referenced);
        }
    }
    let mut roots: Vec<SpoilerSolution> = vec![];
    for &t in &proof.order {
        if referenced.contains(&t) {
            continue;
        }
        let node = nodes[t]
            .as_ref()
            .ok_or_else(|| ProofError(format!("missing proof for token id {t}")))?;
        roots.push(collapse(model, node));
    }
    Ok(roots)
}

fn mark_referenced(node: &SelNode, referenced: &mut HashSet<TokenId>) {
    for req in &node.reqs {
        referenced.insert(req.token);
        mark_referenced(req, referenced);
    }
}

/// Re-minimize an already-minimized tree: uncollapse, re-prune,
/// re-collapse. Idempotent by construction; exposed so callers can
/// normalize hand-built trees in tests and tooling.
pub fn minify_solution(solution: &SpoilerSolution) -> Result<SpoilerSolution, ProofError> {
    let node = uncollapse(solution)?;
    Ok(collapse_names(&prune_named(node)))
}

// Named variants of SelNode/collapse used when re-minimizing trees that
// no longer carry token ids.
#[derive(Clone, Debug)]
struct NamedNode {
    name: String,
    reqs: Vec<NamedNode>,
    depth: usize,
    closure: HashSet<String>,
}

fn uncollapse(solution: &SpoilerSolution) -> Result<NamedNode, ProofError> {
    let branches: Vec<NamedNode> = solution
        .solution
        .iter()
        .map(uncollapse)
        .collect::<Result<_, _>>()?;
    let mut node: Option<NamedNode> = None;
    for name in solution.items.iter().rev() {
        let reqs = match node.take() {
            Some(inner) => vec![inner],
            None => branches.clone(),
        };
        node = Some(prune_named(NamedNode {
            name: name.clone(),
            reqs,
            depth: 0,
            closure: HashSet::new(),
        }));
    }
    node.ok_or_else(|| ProofError("empty solution chain".to_string()))
}

fn prune_named(mut node: NamedNode) -> NamedNode {
    node.depth = node
        .reqs
        .iter()
        .map(|r| r.depth + 1)
        .max()
        .unwrap_or(0);
    node.reqs.sort_by(|a, b| b.depth.cmp(&a.depth));
    let mut kept: Vec<NamedNode> = vec![];
    let mut union: HashSet<String> = HashSet::new();
    for req in node.reqs {
        if req.closure.is_subset(&union) {
            continue;
        }
        union.extend(req.closure.iter().cloned());
        kept.push(req);
    }
    union.insert(node.name.clone());
    node.reqs = kept;
    node.closure = union;
    node
}

fn collapse_names(node: &NamedNode) -> SpoilerSolution {
    let mut items = vec![node.name.clone()];
    let mut cur = node;
    while cur.reqs.len() == 1 {
        cur = &cur.reqs[0];
        items.push(cur.name.clone());
    }
    let solution = if cur.reqs.len() >= 2 {
        cur.reqs.iter().map(collapse_names).collect()
    } else {
        vec![]
    };
    SpoilerSolution { items, solution }
}

/// Indented text rendering. Stable: the same tree always produces
/// byte-identical output. A branch line is prefixed with `"^ "` and
/// indented to the column where its parent's printed line ends, so
/// sibling branches align under the point where they diverge.
pub fn render_solutions(roots: &[SpoilerSolution]) -> Vec<String> {
    let mut lines: Vec<String> = vec![];
    for root in roots {
        render_node(&mut lines, root, 0, false);
    }
    lines
}

fn render_node(lines: &mut Vec<String>, node: &SpoilerSolution, indent: usize, branch: bool) {
    let prefix = if branch { "^ " } else { "" };
    let line = format!("{:indent$}{}{}", "", prefix, node.items.join(" < "));
    let width = line.chars().count();
    lines.push(line);
    for child in &node.solution {
        render_node(lines, child, width, true);
    }
}

pub fn make_spoiler_log(
    model: &AccessModel,
    randomization: &Randomization,
    seed: u64,
) -> Result<SpoilerLog, ProofError> {
    let proof = minify_proof(model, &randomization.proof)?;
    let proof_text = render_solutions(&proof);
    let placements = randomization
        .assignment
        .iter()
        .enumerate()
        .map(|(loc_id, &token)| SpoilerPlacement {
            location: model.location_name(loc_id).to_string(),
            token: model.token_name(token).to_string(),
        })
        .collect();
    Ok(SpoilerLog {
        seed,
        nonce: randomization.nonce,
        placements,
        proof,
        proof_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relicrando_game::{ExtensionMode, GameData, GameDef, LocationDef, TokenDef};

    fn named_model(tokens: &[&str]) -> AccessModel {
        let def = GameDef {
            tokens: tokens
                .iter()
                .map(|name| TokenDef {
                    name: name.to_string(),
                    tier: Default::default(),
                })
                .collect(),
            locations: tokens
                .iter()
                .map(|name| LocationDef {
                    name: format!("loc_{name}"),
                    tier: Default::default(),
                    locks: vec![],
                    escape_locks: vec![],
                })
                .collect(),
        };
        let game_data = GameData::from_def(&def).unwrap();
        AccessModel::build(&game_data, ExtensionMode::None, &[], None).unwrap()
    }

    fn chain(items: &[&str], solution: Vec<SpoilerSolution>) -> SpoilerSolution {
        SpoilerSolution {
            items: items.iter().map(|s| s.to_string()).collect(),
            solution,
        }
    }

    #[test]
    fn render_branch_aligns_under_chain_end() {
        let tree = chain(&["A", "B"], vec![chain(&["C"], vec![])]);
        let lines = render_solutions(&[tree]);
        assert_eq!(lines, vec!["A < B".to_string(), "     ^ C".to_string()]);
    }

    #[test]
    fn render_is_stable() {
        let tree = chain(
            &["A", "B"],
            vec![chain(&["C"], vec![]), chain(&["D", "E"], vec![])],
        );
        let first = render_solutions(&[tree.clone()]);
        let second = render_solutions(&[tree]);
        assert_eq!(first, second);
    }

    #[test]
    fn nested_branches_indent_past_their_parent() {
        let tree = chain(
            &["A"],
            vec![
                chain(&["B"], vec![chain(&["C"], vec![]), chain(&["D"], vec![])]),
                chain(&["E"], vec![]),
            ],
        );
        let lines = render_solutions(&[tree]);
        assert_eq!(
            lines,
            vec![
                "A".to_string(),
                " ^ B".to_string(),
                "    ^ C".to_string(),
                "    ^ D".to_string(),
                " ^ E".to_string(),
            ]
        );
    }

    #[test]
    fn score_tie_break_uses_rational_average() {
        // Same depth and weight; 4/3 vs 4/2: the more-balanced (smaller
        // average) alternative orders first.
        let a = Score {
            depth: 3,
            weight: 4,
            count: 3,
        };
        let b = Score {
            depth: 3,
            weight: 4,
            count: 2,
        };
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a), Ordering::Equal);
    }

    #[test]
    fn minify_solution_is_idempotent() {
        let tree = chain(
            &["A"],
            vec![
                chain(&["B", "C"], vec![]),
                chain(&["D"], vec![chain(&["E"], vec![]), chain(&["F"], vec![])]),
            ],
        );
        let once = minify_solution(&tree).unwrap();
        let twice = minify_solution(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn minify_collapses_single_branch_chains() {
        // A with a single branch B, itself with a single branch C:
        // collapses to one compound chain.
        let tree = chain(&["A"], vec![chain(&["B"], vec![chain(&["C"], vec![])])]);
        let minified = minify_solution(&tree).unwrap();
        assert_eq!(minified, chain(&["A", "B", "C"], vec![]));
    }

    #[test]
    fn proof_with_forward_reference_is_rejected() {
        let model = named_model(&["a", "b"]);
        // a claims to require b, but b is proven after a.
        let proof = ProofDag {
            order: vec![0, 1],
            requires: vec![vec![vec![1]], vec![]],
        };
        match minify_proof(&model, &proof) {
            Err(ProofError(msg)) => assert!(msg.contains("required before it is proven")),
            other => panic!("expected a malformed-proof error, got {other:?}"),
        }
    }

    #[test]
    fn proof_with_duplicate_entry_is_rejected() {
        let model = named_model(&["a", "b"]);
        let proof = ProofDag {
            order: vec![0, 0],
            requires: vec![vec![], vec![]],
        };
        match minify_proof(&model, &proof) {
            Err(ProofError(msg)) => assert!(msg.contains("proven twice")),
            other => panic!("expected a malformed-proof error, got {other:?}"),
        }
    }

    #[test]
    fn minify_drops_dominated_branches() {
        // The ["D"] branch's closure {D} is covered by the ["B", "D"]
        // branch processed first (deeper chain sorts first).
        let tree = chain(
            &["A"],
            vec![chain(&["B", "D"], vec![]), chain(&["D"], vec![])],
        );
        let minified = minify_solution(&tree).unwrap();
        assert_eq!(minified, chain(&["A", "B", "D"], vec![]));
    }
}
