/// Union-find over dense indexes, with path compression and union by rank.
pub(crate) struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub(crate) fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub(crate) fn union(&mut self, left: usize, right: usize) {
        let left_root = self.find(left);
        let right_root = self.find(right);

        if left_root == right_root {
            return;
        }

        let left_rank = self.rank[left_root];
        let right_rank = self.rank[right_root];

        if left_rank < right_rank {
            self.parent[left_root] = right_root;
        } else if left_rank > right_rank {
            self.parent[right_root] = left_root;
        } else {
            self.parent[right_root] = left_root;
            self.rank[left_root] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_union() {
        let mut dsu = DisjointSet::new(6);
        dsu.union(0, 1);
        dsu.union(2, 1);
        dsu.union(4, 5);

        assert_eq!(dsu.find(0), dsu.find(2));
        assert_eq!(dsu.find(4), dsu.find(5));
        assert_ne!(dsu.find(0), dsu.find(4));
        assert_eq!(dsu.find(3), 3);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let n = 200_000;
        let mut dsu = DisjointSet::new(n);
        for i in 1..n {
            dsu.union(i, i - 1);
        }
        assert_eq!(dsu.find(0), dsu.find(n - 1));
    }
}
