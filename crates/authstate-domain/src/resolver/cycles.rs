//! Cycle detection over a recorded grant graph.

const UNVISITED: usize = usize::MAX;

/// Marks every node that lies on a cycle.
///
/// Nodes are `0..adjacency.len()` and edges hold indices into the same range. A node lies on a
/// cycle when its strongly connected component has more than one member or when it has an edge
/// to itself. Uses Tarjan's algorithm with an explicit frame stack, so arbitrarily deep graphs
/// do not grow the call stack.
pub(crate) fn nodes_on_cycles(adjacency: &[Vec<usize>]) -> Vec<bool> {
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut on_cycle = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    // (node, position of the next edge to follow)
    let mut frames: Vec<(usize, usize)> = Vec::new();
    let mut next_index = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            if let Some(&next) = adjacency[node].get(frame.1) {
                frame.1 += 1;
                if next == node {
                    on_cycle[node] = true;
                }
                if index[next] == UNVISITED {
                    index[next] = next_index;
                    lowlink[next] = next_index;
                    next_index += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    frames.push((next, 0));
                } else if on_stack[next] {
                    lowlink[node] = lowlink[node].min(index[next]);
                }
                continue;
            }

            frames.pop();
            if lowlink[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                if component.len() > 1 {
                    for member in component {
                        on_cycle[member] = true;
                    }
                }
            }
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }
        }
    }

    on_cycle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_diamond_has_no_cycle() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let graph = vec![vec![1, 2], vec![3], vec![3], vec![]];
        assert_eq!(nodes_on_cycles(&graph), vec![false; 4]);
    }

    #[test]
    fn test_two_cycle_and_tail() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let graph = vec![vec![1], vec![2], vec![1, 3], vec![]];
        assert_eq!(nodes_on_cycles(&graph), vec![false, true, true, false]);
    }

    #[test]
    fn test_self_loop() {
        let graph = vec![vec![1], vec![1]];
        assert_eq!(nodes_on_cycles(&graph), vec![false, true]);
    }

    #[test]
    fn test_cycle_through_root() {
        let graph = vec![vec![1], vec![2], vec![0]];
        assert_eq!(nodes_on_cycles(&graph), vec![true, true, true]);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let n = 200_000;
        let mut graph: Vec<Vec<usize>> = (0..n).map(|i| vec![i + 1]).collect();
        graph.push(vec![0]);
        let marks = nodes_on_cycles(&graph);
        assert!(marks.iter().all(|&m| m));
    }
}
