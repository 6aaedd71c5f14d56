//! Dependency ordering shared by stack planning and intra-stack ordering.

/// Order nodes so every node comes after its dependencies.
///
/// `deps[i]` lists the indices node `i` must follow. Among nodes that are
/// ready at the same time the lowest index wins, so independent nodes keep
/// their input order. On a cycle, returns the cycle as a closed index path
/// (first and last element equal).
pub fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let ready = (0..n).find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
        match ready {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => return Err(find_cycle(deps, &placed)),
        }
    }

    Ok(order)
}

/// Walk dependency edges among unplaced nodes until one repeats.
fn find_cycle(deps: &[Vec<usize>], placed: &[bool]) -> Vec<usize> {
    let Some(start) = (0..deps.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        // Every unplaced node still waits on some unplaced node.
        let Some(&next) = deps[current].iter().find(|&&d| !placed[d]) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
