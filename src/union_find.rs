/// Union-Find (Disjoint Sets) data structure used for adjacency components,
/// stem circularisation and greedy component breakup
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// Create a new UnionFind with n elements
    pub fn new(n: usize) -> Self {
        let parent = (0..n).collect();
        let rank = vec![0; n];
        let size = vec![1; n];
        UnionFind { parent, rank, size }
    }

    /// Find the root of element x with path compression
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Union two sets containing x and y, returning the new root
    pub fn union(&mut self, x: usize, y: usize) -> usize {
        let root_x = self.find(x);
        let root_y = self.find(y);

        if root_x == root_y {
            return root_x;
        }

        // Union by rank
        let (winner, loser) = if self.rank[root_x] < self.rank[root_y] {
            (root_y, root_x)
        } else if self.rank[root_x] > self.rank[root_y] {
            (root_x, root_y)
        } else {
            self.rank[root_x] += 1;
            (root_x, root_y)
        };
        self.parent[loser] = winner;
        self.size[winner] += self.size[loser];
        winner
    }

    /// Check if two elements are in the same set
    pub fn connected(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }

    /// Number of elements in the set containing x
    pub fn set_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    /// Dense labelling of the sets: element -> set index in 0..number_of_sets.
    /// Set indices follow the order in which each set's first element appears.
    pub fn labels(&mut self) -> (Vec<usize>, usize) {
        let n = self.parent.len();
        let mut root_to_label = vec![usize::MAX; n];
        let mut labels = Vec::with_capacity(n);
        let mut next = 0;
        for i in 0..n {
            let root = self.find(i);
            if root_to_label[root] == usize::MAX {
                root_to_label[root] = next;
                next += 1;
            }
            labels.push(root_to_label[root]);
        }
        (labels, next)
    }
}
